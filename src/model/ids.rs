use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Identifier of a control-component node. Online nodes are numbered from 1.
pub type NodeId = u32;

/// A UUID-shaped identifier, as used for election events and ballot boxes.
///
/// Both the hyphenated and the simple (32 hex digits) forms are accepted,
/// and the original spelling is kept so that it round-trips unchanged.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)?;
        Ok(Self(s.to_string()))
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'a> FromParam<'a> for EntityId {
    type Error = uuid::Error;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

impl UriDisplay<Path> for EntityId {
    fn fmt(&self, formatter: &mut rocket::http::uri::fmt::Formatter<'_, Path>) -> std::fmt::Result {
        formatter.write_value(&self.0)
    }
}

impl_from_uri_param_identity!([Path] EntityId);

/// One unit of mixing work.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotBoxId {
    tenant_id: String,
    election_event_id: EntityId,
    ballot_box_id: EntityId,
}

impl BallotBoxId {
    pub fn new(tenant_id: impl Into<String>, election_event_id: EntityId, ballot_box_id: EntityId) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            election_event_id,
            ballot_box_id,
        }
    }

    /// Parse both identifiers, rejecting anything that is not UUID-shaped.
    pub fn parse(tenant_id: &str, election_event_id: &str, ballot_box_id: &str) -> Result<Self, Error> {
        let election_event_id = election_event_id
            .parse()
            .map_err(|_| Error::BadRequest(format!("Invalid election event id '{election_event_id}'")))?;
        let ballot_box_id = ballot_box_id
            .parse()
            .map_err(|_| Error::BadRequest(format!("Invalid ballot box id '{ballot_box_id}'")))?;
        Ok(Self::new(tenant_id, election_event_id, ballot_box_id))
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn election_event_id(&self) -> &EntityId {
        &self.election_event_id
    }

    pub fn ballot_box_id(&self) -> &EntityId {
        &self.ballot_box_id
    }

    /// The context id under which node commands for this ballot box are recorded.
    pub fn context_id(&self) -> String {
        format!("{}-{}", self.election_event_id, self.ballot_box_id)
    }
}

impl Display for BallotBoxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[electionEventId: {}, ballotBoxId: {}]",
            self.election_event_id, self.ballot_box_id
        )
    }
}
