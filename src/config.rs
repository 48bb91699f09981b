use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::broker::{ChannelBroker, ChannelNames};
use crate::crypto::{ElGamalEngine, Keystore};
use crate::model::{ids::NodeId, mongodb::ensure_indexes_exist};
use crate::services::{Mixnet, MixnetSettings, Stores};
use crate::store::MongoStore;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    tenant_id: String,
    node_count: NodeId,
    local_nodes: Vec<NodeId>,
    retry_count: u32,
    request_channel_prefix: String,
    response_channel_prefix: String,
    status_wait_secs: u64,
    output_dir: PathBuf,
    offline_reshuffle: bool,
    keystore_dir: PathBuf,
}

impl Config {
    /// Tenant all ballot boxes of this instance belong to.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Number of online control-component nodes.
    pub fn node_count(&self) -> NodeId {
        self.node_count
    }

    /// Nodes whose workers run in this process.
    pub fn local_nodes(&self) -> &[NodeId] {
        &self.local_nodes
    }

    /// How often a failed hop is resent before the ballot box is marked ERROR.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn channels(&self) -> ChannelNames {
        ChannelNames::new(&self.request_channel_prefix, &self.response_channel_prefix)
    }

    /// Upper bound of the synchronous wait of the mixing trigger.
    pub fn status_wait(&self) -> Duration {
        Duration::from_secs(self.status_wait_secs)
    }

    /// Root directory of the offline artefacts.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Whether the offline stage shuffles once more before decrypting.
    pub fn offline_reshuffle(&self) -> bool {
        self.offline_reshuffle
    }

    /// Directory holding the root certificate and the key files.
    pub fn keystore_dir(&self) -> &Path {
        &self.keystore_dir
    }

    pub fn mixnet_settings(&self) -> MixnetSettings {
        MixnetSettings {
            tenant_id: self.tenant_id.clone(),
            node_count: self.node_count,
            local_nodes: self.local_nodes.clone(),
            retry_count: self.retry_count,
            channels: self.channels(),
            status_wait: self.status_wait(),
            output_dir: self.output_dir.clone(),
            offline_reshuffle: self.offline_reshuffle,
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.node_count == 0 || config.local_nodes.iter().any(|&n| n == 0 || n > config.node_count) {
            error!(
                "Local nodes {:?} must lie within 1..={}",
                config.local_nodes, config.node_count
            );
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// A fairing that loads the platform root certificate and the keys of the
/// local nodes. Must be attached after [`ConfigFairing`].
pub struct KeystoreFairing;

#[rocket::async_trait]
impl Fairing for KeystoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Keystore",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let Some(config) = rocket.state::<Config>() else {
            error!("Keystore requires the application config");
            return Err(rocket);
        };
        let keystore = match Keystore::load(config.keystore_dir(), config.local_nodes()) {
            Ok(keystore) => keystore,
            Err(e) => {
                error!("Failed to load keystore from {}: {e}", config.keystore_dir().display());
                return Err(rocket);
            }
        };
        info!("Loaded keys of nodes {:?}", config.local_nodes());

        Ok(rocket.manage(keystore))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places a `Client`, a `Database` and
/// the [`MongoStore`] into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        let store = Arc::new(MongoStore::new(&db));
        rocket = rocket.manage(client).manage(db).manage(store);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
pub(crate) fn get_database_name() -> String {
    "mixnet".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// A fairing that starts the local node workers and the orchestrator on top
/// of the managed config, keystore and store, and manages the [`Mixnet`].
/// Must be attached after the other fairings of this module.
pub struct MixnetFairing;

#[rocket::async_trait]
impl Fairing for MixnetFairing {
    fn info(&self) -> Info {
        Info {
            name: "Mix-net",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (Some(config), Some(keystore), Some(store)) = (
            rocket.state::<Config>(),
            rocket.state::<Keystore>(),
            rocket.state::<Arc<MongoStore>>(),
        ) else {
            error!("Mix-net requires the config, keystore and database fairings");
            return Err(rocket);
        };

        let mixnet = match Mixnet::start(
            &config.mixnet_settings(),
            keystore,
            Stores::shared(store.clone()),
            Arc::new(ElGamalEngine),
            Arc::new(ChannelBroker::new()),
        ) {
            Ok(mixnet) => mixnet,
            Err(e) => {
                error!("Failed to start the mix-net: {e}");
                return Err(rocket);
            }
        };

        Ok(rocket.manage(mixnet))
    }
}

#[cfg(test)]
mod tests {
    use rocket::figment::{providers::Serialized, Figment};

    use super::*;

    fn figment() -> Figment {
        Figment::new().merge(Serialized::defaults(serde_json::json!({
            "tenant_id": "100",
            "node_count": 3,
            "local_nodes": [1, 2, 3],
            "retry_count": 3,
            "request_channel_prefix": "mixdec-request-",
            "response_channel_prefix": "mixdec-response-",
            "status_wait_secs": 30,
            "output_dir": "output",
            "offline_reshuffle": true,
            "keystore_dir": "keystore",
        })))
    }

    #[test]
    fn settings_follow_the_config() {
        let config: Config = figment().extract().unwrap();
        let settings = config.mixnet_settings();
        assert_eq!(settings.node_count, 3);
        assert_eq!(settings.channels.request(2), "mixdec-request-2");
        assert_eq!(settings.channels.response(1), "mixdec-response-1");
        assert_eq!(settings.status_wait, Duration::from_secs(30));
        assert!(settings.offline_reshuffle);
    }

    #[rocket::async_test]
    async fn ignition_fails_for_nodes_outside_the_mixnet() {
        let figment = Figment::from(rocket::Config::default())
            .merge(figment())
            .merge(Serialized::default("local_nodes", [4]));
        let rocket = rocket::custom(figment).attach(ConfigFairing);
        let result = rocket.ignite().await;
        // rocket::Error panics on drop unless inspected; mark it handled.
        if let Err(e) = &result {
            let _ = e.kind();
        }
        assert!(result.is_err());
    }
}
