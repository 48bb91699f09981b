use std::path::{Path, PathBuf};

use num_bigint::BigUint;
use rocket::tokio::fs;

use crate::error::Result;
use crate::model::{ids::BallotBoxId, payload::MixnetFinalPayload};

pub const VOTES_FILE: &str = "decompressedVotes.csv";
pub const FINAL_PAYLOAD_FILE: &str = "finalPayload.json";

const SEPARATOR: &str = ";";

/// Where the offline artefacts of a ballot box are written.
pub fn ballot_box_dir(output_dir: &Path, id: &BallotBoxId) -> PathBuf {
    output_dir
        .join(id.election_event_id().as_str())
        .join(id.ballot_box_id().as_str())
}

/// One line per vote, the selected options separated by `;`, no header.
pub fn render_votes(votes: &[Vec<BigUint>]) -> String {
    votes
        .iter()
        .map(|selections| {
            let line = selections
                .iter()
                .map(|option| option.to_string())
                .collect::<Vec<_>>()
                .join(SEPARATOR);
            line + "\n"
        })
        .collect()
}

/// Replace `path` with `contents` so readers never see a half-written file.
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn write_votes(dir: &Path, votes: &[Vec<BigUint>]) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(VOTES_FILE);
    write_atomically(&path, render_votes(votes).as_bytes()).await?;
    Ok(path)
}

pub async fn write_final_payload(dir: &Path, payload: &MixnetFinalPayload) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(FINAL_PAYLOAD_FILE);
    write_atomically(&path, &serde_json::to_vec_pretty(payload)?).await?;
    Ok(path)
}
