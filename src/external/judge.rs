use futures::future::{self, BoxFuture};

use super::CollaboratorResult;

/// Points awarded per character by [`LengthJudge`].
const POINTS_PER_CHAR: i64 = 10;

/// Scores submitted code. Treated as an opaque function of the text.
pub trait Judge: Send + Sync {
    /// Score one submission.
    fn score_submission(&self, code: String) -> BoxFuture<'static, CollaboratorResult<i64>>;
}

/// Placeholder judge: ten points per character.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthJudge;

impl Judge for LengthJudge {
    fn score_submission(&self, code: String) -> BoxFuture<'static, CollaboratorResult<i64>> {
        let chars = i64::try_from(code.chars().count()).unwrap_or(i64::MAX / POINTS_PER_CHAR);
        Box::pin(future::ready(Ok(chars.saturating_mul(POINTS_PER_CHAR))))
    }
}

#[cfg(feature = "http-collaborators")]
pub use http::HttpJudge;

#[cfg(feature = "http-collaborators")]
mod http {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use reqwest::Client;
    use serde::{Deserialize, Serialize};

    use super::Judge;
    use crate::external::{CollaboratorError, CollaboratorResult};

    /// Remote judge answering `POST /score` with `{ "score": n }`.
    #[derive(Clone)]
    pub struct HttpJudge {
        client: Client,
        base_url: Arc<str>,
    }

    #[derive(Serialize)]
    struct ScoreRequest<'a> {
        code: &'a str,
    }

    #[derive(Deserialize)]
    struct ScoreResponse {
        score: i64,
    }

    impl HttpJudge {
        /// Build a client for the judge rooted at `base_url`.
        pub fn new(base_url: &str) -> CollaboratorResult<Self> {
            let client = Client::builder()
                .build()
                .map_err(|source| CollaboratorError::ClientBuilder { source })?;
            Ok(Self {
                client,
                base_url: Arc::from(base_url.trim_end_matches('/')),
            })
        }

        async fn score(&self, code: String) -> CollaboratorResult<i64> {
            let url = format!("{}/score", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&ScoreRequest { code: &code })
                .send()
                .await
                .map_err(|source| CollaboratorError::RequestSend {
                    url: url.clone(),
                    source,
                })?;

            if !response.status().is_success() {
                return Err(CollaboratorError::RequestStatus {
                    status: response.status(),
                    url,
                });
            }

            response
                .json::<ScoreResponse>()
                .await
                .map(|body| body.score)
                .map_err(|source| CollaboratorError::DecodeResponse { url, source })
        }
    }

    impl Judge for HttpJudge {
        fn score_submission(&self, code: String) -> BoxFuture<'static, CollaboratorResult<i64>> {
            let judge = self.clone();
            Box::pin(async move { judge.score(code).await })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn length_judge_counts_characters() {
        let judge = LengthJudge;
        assert_eq!(judge.score_submission("0123456789".into()).await.unwrap(), 100);
        assert_eq!(judge.score_submission("abcde".into()).await.unwrap(), 50);
        assert_eq!(judge.score_submission(String::new()).await.unwrap(), 0);
        assert_eq!(judge.score_submission("héllo".into()).await.unwrap(), 50);
    }
}
