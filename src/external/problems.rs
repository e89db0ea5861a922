use std::sync::Arc;

use futures::future::{self, BoxFuture};
use rand::seq::IndexedRandom;
use serde::Deserialize;

use super::{CollaboratorError, CollaboratorResult};

/// Problem statement handed to both players of a room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Problem {
    /// Identifier stored on the room.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Full statement.
    #[serde(default)]
    pub description: String,
}

/// Source of problems.
pub trait ProblemBank: Send + Sync {
    /// Look a problem up by id; `None` when the bank does not know it.
    fn get_problem(&self, id: String) -> BoxFuture<'static, CollaboratorResult<Option<Problem>>>;

    /// Choose the problem for a new room.
    fn pick_problem_id(&self) -> BoxFuture<'static, CollaboratorResult<String>>;
}

/// Fixed catalogue with uniform random selection.
#[derive(Debug, Clone)]
pub struct StaticProblemBank {
    problems: Arc<[Problem]>,
}

impl StaticProblemBank {
    /// Wrap a catalogue.
    pub fn new(problems: Vec<Problem>) -> Self {
        Self {
            problems: problems.into(),
        }
    }
}

impl ProblemBank for StaticProblemBank {
    fn get_problem(&self, id: String) -> BoxFuture<'static, CollaboratorResult<Option<Problem>>> {
        let problem = self.problems.iter().find(|p| p.id == id).cloned();
        Box::pin(future::ready(Ok(problem)))
    }

    fn pick_problem_id(&self) -> BoxFuture<'static, CollaboratorResult<String>> {
        let picked = self
            .problems
            .choose(&mut rand::rng())
            .map(|p| p.id.clone())
            .ok_or(CollaboratorError::EmptyCatalogue);
        Box::pin(future::ready(picked))
    }
}

#[cfg(feature = "http-collaborators")]
pub use http::HttpProblemBank;

#[cfg(feature = "http-collaborators")]
mod http {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use reqwest::{Client, StatusCode};
    use serde::Deserialize;

    use super::{Problem, ProblemBank};
    use crate::external::{CollaboratorError, CollaboratorResult};

    /// Remote bank exposing `GET /problems/{id}` and `GET /problems/random`.
    #[derive(Clone)]
    pub struct HttpProblemBank {
        client: Client,
        base_url: Arc<str>,
    }

    #[derive(Deserialize)]
    struct PickedProblem {
        id: String,
    }

    impl HttpProblemBank {
        /// Build a client for the bank rooted at `base_url`.
        pub fn new(base_url: &str) -> CollaboratorResult<Self> {
            let client = Client::builder()
                .build()
                .map_err(|source| CollaboratorError::ClientBuilder { source })?;
            Ok(Self {
                client,
                base_url: Arc::from(base_url.trim_end_matches('/')),
            })
        }

        async fn fetch(&self, id: String) -> CollaboratorResult<Option<Problem>> {
            let url = format!("{}/problems/{}", self.base_url, id);
            let response = self.client.get(&url).send().await.map_err(|source| {
                CollaboratorError::RequestSend {
                    url: url.clone(),
                    source,
                }
            })?;

            match response.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => response
                    .json::<Problem>()
                    .await
                    .map(Some)
                    .map_err(|source| CollaboratorError::DecodeResponse { url, source }),
                status => Err(CollaboratorError::RequestStatus { url, status }),
            }
        }

        async fn pick(&self) -> CollaboratorResult<String> {
            let url = format!("{}/problems/random", self.base_url);
            let response = self.client.get(&url).send().await.map_err(|source| {
                CollaboratorError::RequestSend {
                    url: url.clone(),
                    source,
                }
            })?;

            if !response.status().is_success() {
                return Err(CollaboratorError::RequestStatus {
                    status: response.status(),
                    url,
                });
            }

            response
                .json::<PickedProblem>()
                .await
                .map(|picked| picked.id)
                .map_err(|source| CollaboratorError::DecodeResponse { url, source })
        }
    }

    impl ProblemBank for HttpProblemBank {
        fn get_problem(
            &self,
            id: String,
        ) -> BoxFuture<'static, CollaboratorResult<Option<Problem>>> {
            let bank = self.clone();
            Box::pin(async move { bank.fetch(id).await })
        }

        fn pick_problem_id(&self) -> BoxFuture<'static, CollaboratorResult<String>> {
            let bank = self.clone();
            Box::pin(async move { bank.pick().await })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> StaticProblemBank {
        StaticProblemBank::new(vec![
            Problem {
                id: "problem_1".into(),
                title: "Reverse".into(),
                description: "Reverse a string.".into(),
            },
            Problem {
                id: "problem_2".into(),
                title: "Sum".into(),
                description: String::new(),
            },
        ])
    }

    #[tokio::test]
    async fn picks_from_catalogue() {
        let bank = catalogue();
        for _ in 0..20 {
            let id = bank.pick_problem_id().await.unwrap();
            assert!(id == "problem_1" || id == "problem_2");
        }
    }

    #[tokio::test]
    async fn unknown_problem_is_none() {
        let bank = catalogue();
        assert_eq!(
            bank.get_problem("problem_1".into()).await.unwrap().map(|p| p.title),
            Some("Reverse".to_owned())
        );
        assert!(bank.get_problem("nope".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_catalogue_cannot_pick() {
        let bank = StaticProblemBank::new(Vec::new());
        assert!(matches!(
            bank.pick_problem_id().await,
            Err(CollaboratorError::EmptyCatalogue)
        ));
    }
}
