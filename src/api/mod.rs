use rocket::Route;

mod mixing;
mod offline;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(mixing::routes());
    routes.extend(offline::routes());
    routes
}
