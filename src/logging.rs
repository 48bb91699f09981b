use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{uri::Origin, StatusClass},
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A unique identifier for a particular request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID. This wraps around back to zero if you somehow exceed a usize.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Allow the ID to be accessed via request guard.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = (); // No errors possible, use the `!` type once stabilised.

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(req.local_cache(RequestId::next))
    }
}

/// The ballot box addressed by a control-surface URI, formatted for logging.
fn mixing_context(uri: &Origin<'_>) -> Option<String> {
    let segments: Vec<&str> = uri.path().segments().collect();
    let after = |name: &str| {
        segments
            .iter()
            .position(|segment| *segment == name)
            .and_then(|i| segments.get(i + 1))
            .copied()
    };
    let election_event = after("electionevent")?;
    Some(match after("ballotbox") {
        Some(ballot_box) => format!("[electionEventId: {election_event}, ballotBoxId: {ballot_box}]"),
        None => format!("[electionEventId: {election_event}]"),
    })
}

/// The mixing context of a request, resolved once when it arrives.
#[derive(Debug, Clone, Default)]
struct RequestContext(Option<String>);

impl RequestContext {
    fn of<'r>(req: &'r Request<'_>) -> &'r RequestContext {
        req.local_cache(|| RequestContext(mixing_context(req.uri())))
    }
}

/// Join the parts of a log line, skipping a missing context.
fn log_line(head: String, context: &RequestContext) -> String {
    match &context.0 {
        Some(context) => format!("{head} {context}"),
        None => head,
    }
}

fn route_name(req: &Request<'_>) -> String {
    match req.route() {
        Some(route) => match &route.name {
            Some(name) => format!("{name} ({})", route.uri),
            None => route.uri.to_string(),
        },
        None => "UNKNOWN ROUTE".to_string(),
    }
}

/// Logs every request and its response under a shared request id.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let protocol = if rocket.config().tls_enabled() { "https" } else { "http" };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("Mixing control surface up on {protocol}://{ip}:{port}");
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let id = req.local_cache(RequestId::next);
        let head = format!("->req{id} {} {}", req.method(), req.uri());
        info!("{}", log_line(head, RequestContext::of(req)));
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = req.local_cache(RequestId::next);
        let code = res.status();
        let line = log_line(format!("<-rsp{id} {code} {}", route_name(req)), RequestContext::of(req));
        match code.class() {
            StatusClass::ServerError => error!("{line}"),
            StatusClass::ClientError => warn!("{line}"),
            _ => info!("{line}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, draining the mix-net...");
    }
}
