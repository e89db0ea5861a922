//! Collaborators consumed by the battle core: identity, problem bank and judge.

pub mod identity;
pub mod judge;
pub mod problems;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::AppConfig;

use self::{
    identity::{AnonymousIdentity, IdentityProvider},
    judge::{Judge, LengthJudge},
    problems::{ProblemBank, StaticProblemBank},
};

/// Result alias for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Failures raised by external collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The static catalogue has nothing to pick from.
    #[error("problem catalogue is empty")]
    EmptyCatalogue,
    /// Building the HTTP client failed.
    #[cfg(feature = "http-collaborators")]
    #[error("failed to build HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[cfg(feature = "http-collaborators")]
    #[error("failed to send request to `{url}`")]
    RequestSend {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The collaborator answered with an unexpected status code.
    #[cfg(feature = "http-collaborators")]
    #[error("unexpected response status {status} from `{url}`")]
    RequestStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    /// Response payload could not be parsed.
    #[cfg(feature = "http-collaborators")]
    #[error("failed to decode response from `{url}`")]
    DecodeResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Every collaborator the services need, behind trait objects.
#[derive(Clone)]
pub struct Collaborators {
    /// Issues and validates opaque user ids.
    pub identity: Arc<dyn IdentityProvider>,
    /// Problem lookup and selection.
    pub problems: Arc<dyn ProblemBank>,
    /// Submission scoring.
    pub judge: Arc<dyn Judge>,
}

impl Collaborators {
    /// In-process collaborators: anonymous ids, the configured catalogue, the length judge.
    pub fn local(config: &AppConfig) -> Self {
        Self {
            identity: Arc::new(AnonymousIdentity),
            problems: Arc::new(StaticProblemBank::new(config.problems().to_vec())),
            judge: Arc::new(LengthJudge),
        }
    }

    /// Pick remote collaborators where the configuration names a URL.
    pub fn from_config(config: &AppConfig) -> CollaboratorResult<Self> {
        #[cfg_attr(not(feature = "http-collaborators"), allow(unused_mut))]
        let mut collaborators = Self::local(config);

        #[cfg(feature = "http-collaborators")]
        {
            if let Some(url) = config.problem_bank_url() {
                info!(url, "using remote problem bank");
                collaborators.problems = Arc::new(problems::HttpProblemBank::new(url)?);
            }
            if let Some(url) = config.judge_url() {
                info!(url, "using remote judge");
                collaborators.judge = Arc::new(judge::HttpJudge::new(url)?);
            }
        }

        #[cfg(not(feature = "http-collaborators"))]
        if config.problem_bank_url().is_some() || config.judge_url().is_some() {
            info!("remote collaborators configured but HTTP support is disabled; using local ones");
        }

        Ok(collaborators)
    }
}
