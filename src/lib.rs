#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, KeystoreFairing, MixnetFairing};
use crate::logging::LoggerFairing;
use crate::services::Mixnet;

pub mod api;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod model;
pub mod node;
pub mod offline;
pub mod orchestrator;
pub mod processor;
pub mod services;
pub mod store;

#[cfg(test)]
mod testing;

/// Build the production server: config, keystore and database are loaded on
/// ignition, then the local nodes and the orchestrator are started.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(KeystoreFairing)
        .attach(DatabaseFairing)
        .attach(MixnetFairing)
        .attach(LoggerFairing)
}

/// Serve an already running mix-net.
pub fn rocket_for_mixnet(mixnet: Mixnet) -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .manage(mixnet)
        .attach(LoggerFairing)
}

/// Connect to the database configured for tests.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .unwrap_or_else(|e| panic!("Could not connect to database with `db_uri` \"{db_uri}\": {e}"))
}

#[cfg(test)]
pub(crate) fn database() -> String {
    config::get_database_name()
}

/// A mix-net of three local nodes running on the given database.
#[cfg(test)]
pub(crate) async fn rocket_for_db(db_client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    use std::sync::Arc;

    use crate::broker::ChannelBroker;
    use crate::crypto::ElGamalEngine;
    use crate::services::Stores;
    use crate::store::MongoStore;
    use crate::testing::{TestElection, TestNet};

    let db = db_client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db).await.unwrap();
    let election = TestElection::new(3);
    let mixnet = Mixnet::start(
        &TestNet::settings(3, 3),
        &election.keystore(),
        Stores::shared(Arc::new(MongoStore::new(&db))),
        Arc::new(ElGamalEngine),
        Arc::new(ChannelBroker::new()),
    )
    .unwrap();

    rocket_for_mixnet(mixnet)
        .manage(election)
        .manage(db_client)
        .manage(db)
}
