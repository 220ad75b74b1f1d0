//! Media generation capabilities.
//!
//! Avatar and video generation are declared so clients can discover them,
//! but no provider is wired in yet. Each request resolves to
//! [`MediaOutcome::NotImplemented`], which the server answers with 501.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCapability {
    Avatar,
    Video,
}

impl MediaCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCapability::Avatar => "avatar",
            MediaCapability::Video => "video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOutcome {
    NotImplemented { capability: MediaCapability },
}

pub fn generate(capability: MediaCapability) -> MediaOutcome {
    tracing::debug!(capability = capability.as_str(), "media generation requested");
    MediaOutcome::NotImplemented { capability }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_capability_is_unimplemented() {
        for cap in [MediaCapability::Avatar, MediaCapability::Video] {
            assert_eq!(
                generate(cap),
                MediaOutcome::NotImplemented { capability: cap }
            );
        }
    }
}
