//! Checksum computation and trust policies.
//!
//! A [`ChecksumPolicy`] decides whether content fetched from an origin is
//! acceptable given the checksums the origin declared and the ones computed
//! locally, and which value is reported back to clients. Every policy is a
//! total function over declared/computed presence.

use std::collections::BTreeMap;
use std::fmt;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::{ChecksumSet, ChecksumType};

/// Checksum values keyed by type, lowercase hex.
pub type Checksums = BTreeMap<ChecksumType, String>;

/// Computes MD5, SHA-1 and SHA-256 over `data`.
pub fn compute_checksums(data: &[u8]) -> Checksums {
    let mut out = Checksums::new();
    out.insert(ChecksumType::Md5, hex::encode(Md5::digest(data)));
    out.insert(ChecksumType::Sha1, hex::encode(Sha1::digest(data)));
    out.insert(ChecksumType::Sha256, hex::encode(Sha256::digest(data)));
    debug!(size = data.len(), "computed checksums");
    out
}

/// Outcome of a policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Content is trusted.
    Accept,
    /// Content is accepted but something was off.
    AcceptWithWarning(String),
    /// Content must not be cached.
    Reject(String),
}

impl Decision {
    /// Accept or AcceptWithWarning.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Decision::Reject(_))
    }
}

/// How declared and computed checksums are trusted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumPolicy {
    /// Verify against declared checksums; generate when the origin declares none.
    #[default]
    GenerateIfAbsent,
    /// Reject unless a declared checksum matches.
    Fail,
    /// Ignore declared checksums and serve computed ones.
    IgnoreAndGenerate,
    /// Accept anything and pass declared checksums through to clients.
    PassThru,
    /// Local repositories: trust checksums deployed by the client.
    Client,
    /// Local repositories: always serve server-computed checksums.
    Server,
}

impl ChecksumPolicy {
    /// Decides on freshly fetched content.
    pub fn accept(&self, declared: &Checksums, computed: &Checksums) -> Decision {
        self.verify(&ChecksumSet::from_parts(declared, computed))
    }

    /// Decides on a paired checksum set.
    pub fn verify(&self, set: &ChecksumSet) -> Decision {
        let declared = set.has_declared();
        let computed = set.has_computed();
        let conflicts = set.conflicting_types();
        let matched = set.all_comparable_match();

        let decision = match self {
            ChecksumPolicy::GenerateIfAbsent | ChecksumPolicy::Client => {
                if !computed {
                    Decision::Reject("no locally computed checksum to verify".to_string())
                } else if !declared {
                    Decision::AcceptWithWarning("origin declared no checksum; generated locally".to_string())
                } else if !conflicts.is_empty() {
                    Decision::Reject(mismatch_reason(&conflicts))
                } else if matched {
                    Decision::Accept
                } else {
                    Decision::AcceptWithWarning(
                        "declared checksums have no computed counterpart".to_string(),
                    )
                }
            }
            ChecksumPolicy::Fail => {
                if !computed {
                    Decision::Reject("no locally computed checksum to verify".to_string())
                } else if !declared {
                    Decision::Reject("origin declared no checksum".to_string())
                } else if !conflicts.is_empty() {
                    Decision::Reject(mismatch_reason(&conflicts))
                } else if matched {
                    Decision::Accept
                } else {
                    Decision::Reject("no declared checksum could be compared".to_string())
                }
            }
            ChecksumPolicy::IgnoreAndGenerate | ChecksumPolicy::Server => {
                if !computed {
                    Decision::AcceptWithWarning("no locally computed checksum".to_string())
                } else if !conflicts.is_empty() {
                    Decision::AcceptWithWarning(mismatch_reason(&conflicts))
                } else {
                    Decision::Accept
                }
            }
            ChecksumPolicy::PassThru => {
                if declared && computed && conflicts.is_empty() && matched {
                    Decision::Accept
                } else if !conflicts.is_empty() {
                    Decision::AcceptWithWarning(mismatch_reason(&conflicts))
                } else if !declared {
                    Decision::AcceptWithWarning("origin declared no checksum".to_string())
                } else {
                    Decision::AcceptWithWarning("checksums could not be compared".to_string())
                }
            }
        };
        debug!(policy = %self, ?decision, "checksum policy decision");
        decision
    }

    /// The value reported to clients for `checksum_type`, if any.
    pub fn checksum_to_return(&self, checksum_type: ChecksumType, set: &ChecksumSet) -> Option<String> {
        let info = set.get(checksum_type)?;
        match self {
            ChecksumPolicy::IgnoreAndGenerate | ChecksumPolicy::Server => info.actual.clone(),
            ChecksumPolicy::GenerateIfAbsent
            | ChecksumPolicy::Fail
            | ChecksumPolicy::PassThru
            | ChecksumPolicy::Client => info.original.clone().or_else(|| info.actual.clone()),
        }
    }
}

impl fmt::Display for ChecksumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumPolicy::GenerateIfAbsent => "generate-if-absent",
            ChecksumPolicy::Fail => "fail",
            ChecksumPolicy::IgnoreAndGenerate => "ignore-and-generate",
            ChecksumPolicy::PassThru => "pass-thru",
            ChecksumPolicy::Client => "client",
            ChecksumPolicy::Server => "server",
        };
        write!(f, "{}", name)
    }
}

fn mismatch_reason(conflicts: &[ChecksumType]) -> String {
    let names: Vec<String> = conflicts.iter().map(|t| t.to_string()).collect();
    format!("checksum mismatch ({})", names.join(", "))
}
