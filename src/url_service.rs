use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    token::{ShortToken, TokenGenerator, token_generator_capsule},
    url_repo::{
        InsertMappingError, StorageUnavailable, UrlMapping, UrlMappingRepository,
        url_repository_capsule,
    },
};

/// Fresh tokens tried by [`UrlShortenerService::submit`] before giving up.
pub const SUBMIT_ATTEMPTS: usize = 3;

#[derive(Debug)]
pub struct Redirect {
    pub url: String,
}

pub fn url_shortener_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlShortenerService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let token_generator = Arc::clone(get.as_ref(token_generator_capsule));
    Arc::new(UrlShortenerServiceImpl {
        url_repo,
        token_generator,
    })
}

#[async_trait]
pub trait UrlShortenerService: Send + Sync {
    /// Issues a new short token for `long_url` and persists the mapping.
    async fn submit(&self, long_url: &str) -> Result<UrlMapping, SubmitError>;

    /// Looks up the long URL behind `short_token`.
    async fn resolve(&self, short_token: &str) -> Result<Redirect, ResolveError>;
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("every generated short token was already taken ({attempts} attempts)")]
    TokenSpaceExhausted { attempts: usize },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short token not found")]
    NotFound,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(anyhow::Error),
}

struct UrlShortenerServiceImpl {
    url_repo: Arc<dyn UrlMappingRepository>,
    token_generator: Arc<dyn TokenGenerator>,
}

#[async_trait]
impl UrlShortenerService for UrlShortenerServiceImpl {
    #[instrument(skip(self))]
    async fn submit(&self, long_url: &str) -> Result<UrlMapping, SubmitError> {
        for attempt in 1..=SUBMIT_ATTEMPTS {
            let to_insert = UrlMapping {
                short_token: self.token_generator.generate(),
                long_url: long_url.to_owned(),
            };
            let short_token = to_insert.short_token.clone();

            match self.url_repo.insert_mapping(to_insert).await {
                Ok(mapping) => return Ok(mapping),
                // NOTE: a storage failure is returned as-is; only collisions are retried
                Err(InsertMappingError::StorageUnavailable(err)) => {
                    return Err(SubmitError::StorageUnavailable(err));
                }
                Err(InsertMappingError::TokenTaken) => {
                    warn!(%short_token, attempt, "Generated short token that was already taken");
                }
            }
        }

        Err(SubmitError::TokenSpaceExhausted {
            attempts: SUBMIT_ATTEMPTS,
        })
    }

    #[instrument(skip(self))]
    async fn resolve(&self, short_token: &str) -> Result<Redirect, ResolveError> {
        // NOTE: a token that fails validation can never have been issued
        let short_token = match ShortToken::new(short_token.to_owned()) {
            Ok(short_token) => short_token,
            Err(err) => {
                debug!(?err, "Rejected malformed short token");
                return Err(ResolveError::NotFound);
            }
        };

        match self.url_repo.find_by_token(&short_token).await {
            Ok(Some(mapping)) => Ok(Redirect {
                url: mapping.long_url,
            }),
            Ok(None) => Err(ResolveError::NotFound),
            Err(StorageUnavailable(err)) => Err(ResolveError::StorageUnavailable(err)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use mockall::{mock, predicate::*};

    use crate::{
        token::{ALPHABET, GENERATED_TOKEN_LEN, RandomTokenGenerator},
        url_repo::{sea_orm_url_repository, tests::sqlite_db},
    };

    use super::*;

    mock! {
        UrlMappingRepository {}

        #[async_trait]
        impl UrlMappingRepository for UrlMappingRepository {
            async fn insert_mapping(&self, mapping: UrlMapping) -> Result<UrlMapping, InsertMappingError>;
            async fn find_by_token(&self, short_token: &ShortToken) -> Result<Option<UrlMapping>, StorageUnavailable>;
        }
    }

    mock! {
        TokenGenerator {}

        impl TokenGenerator for TokenGenerator {
            fn generate(&self) -> ShortToken;
        }
    }

    fn token(token: &str) -> ShortToken {
        ShortToken::new(token.to_owned()).unwrap()
    }

    fn generator_yielding(tokens: &[&str]) -> MockTokenGenerator {
        let mut tokens: Vec<_> = tokens.iter().rev().map(|t| token(t)).collect();
        let mut mock_generator = MockTokenGenerator::new();
        mock_generator
            .expect_generate()
            .times(tokens.len())
            .returning(move || tokens.pop().unwrap());
        mock_generator
    }

    fn service(
        url_repo: MockUrlMappingRepository,
        token_generator: MockTokenGenerator,
    ) -> UrlShortenerServiceImpl {
        UrlShortenerServiceImpl {
            url_repo: Arc::new(url_repo),
            token_generator: Arc::new(token_generator),
        }
    }

    async fn sqlite_service() -> UrlShortenerServiceImpl {
        UrlShortenerServiceImpl {
            url_repo: sea_orm_url_repository(sqlite_db().await, Duration::from_secs(5)),
            token_generator: Arc::new(RandomTokenGenerator),
        }
    }

    #[tokio::test]
    async fn test_submit_success() {
        let long_url = "https://example.com/very/long/path";
        let expected_mapping = UrlMapping {
            short_token: token("abcDEF12"),
            long_url: long_url.to_owned(),
        };

        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_insert_mapping()
            .with(eq(expected_mapping.clone()))
            .once()
            .return_once(Ok);

        let service = service(mock_repo, generator_yielding(&["abcDEF12"]));
        let result = service.submit(long_url).await.unwrap();
        assert_eq!(result, expected_mapping);
    }

    #[tokio::test]
    async fn test_submit_retries_taken_token() {
        let long_url = "https://example.com/";

        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_insert_mapping()
            .withf(|mapping| mapping.short_token.as_str() == "taken001")
            .once()
            .return_once(|_| Err(InsertMappingError::TokenTaken));
        mock_repo
            .expect_insert_mapping()
            .withf(|mapping| mapping.short_token.as_str() == "fresh002")
            .once()
            .return_once(Ok);

        let service = service(mock_repo, generator_yielding(&["taken001", "fresh002"]));
        let result = service.submit(long_url).await.unwrap();
        assert_eq!(result.short_token, token("fresh002"));
        assert_eq!(result.long_url, long_url);
    }

    #[tokio::test]
    async fn test_submit_token_space_exhausted() {
        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_insert_mapping()
            .times(SUBMIT_ATTEMPTS)
            .returning(|_| Err(InsertMappingError::TokenTaken));

        let service = service(
            mock_repo,
            generator_yielding(&["taken001", "taken002", "taken003"]),
        );
        let result = service.submit("https://example.com/").await.unwrap_err();
        assert!(matches!(
            result,
            SubmitError::TokenSpaceExhausted { attempts } if attempts == SUBMIT_ATTEMPTS
        ));
    }

    #[tokio::test]
    async fn test_submit_storage_unavailable_is_not_retried() {
        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_insert_mapping()
            .once()
            .return_once(|_| {
                Err(InsertMappingError::StorageUnavailable(anyhow::anyhow!(
                    "test failure"
                )))
            });

        let service = service(mock_repo, generator_yielding(&["abcDEF12"]));
        let result = service.submit("https://example.com/").await.unwrap_err();
        assert!(matches!(
            result,
            SubmitError::StorageUnavailable(err) if err.to_string() == "test failure"
        ));
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let long_url = "https://example.com/long";
        let mapping = UrlMapping {
            short_token: token("testurl1"),
            long_url: long_url.to_owned(),
        };

        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_find_by_token()
            .with(eq(token("testurl1")))
            .once()
            .return_once(move |_| Ok(Some(mapping)));

        let service = service(mock_repo, MockTokenGenerator::new());
        let result = service.resolve("testurl1").await.unwrap();
        assert_eq!(result.url, long_url);
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_find_by_token()
            .with(eq(token("0000000")))
            .once()
            .return_once(|_| Ok(None));

        let service = service(mock_repo, MockTokenGenerator::new());
        let result = service.resolve("0000000").await.unwrap_err();
        assert!(matches!(result, ResolveError::NotFound));
    }

    #[tokio::test]
    async fn test_resolve_malformed_token_skips_lookup() {
        let service = service(MockUrlMappingRepository::new(), MockTokenGenerator::new());
        let too_long = "a".repeat(33);

        for malformed in ["", "has space", "ab^*", too_long.as_str()] {
            let result = service.resolve(malformed).await.unwrap_err();
            assert!(matches!(result, ResolveError::NotFound));
        }
    }

    #[tokio::test]
    async fn test_resolve_db_error() {
        let mut mock_repo = MockUrlMappingRepository::new();
        mock_repo
            .expect_find_by_token()
            .once()
            .return_once(|_| Err(StorageUnavailable(anyhow::anyhow!("test error"))));

        let service = service(mock_repo, MockTokenGenerator::new());
        let result = service.resolve("testurl1").await.unwrap_err();
        assert!(matches!(
            result,
            ResolveError::StorageUnavailable(err) if err.to_string() == "test error"
        ));
    }

    #[tokio::test]
    async fn test_submit_then_resolve_against_sqlite() {
        let service = sqlite_service().await;
        let long_url = "https://example.com/very/long/path";

        let mapping = service.submit(long_url).await.unwrap();
        let issued = mapping.short_token.as_str();
        assert_eq!(issued.len(), GENERATED_TOKEN_LEN);
        assert!(issued.bytes().all(|b| ALPHABET.contains(&b)));

        let redirect = service.resolve(issued).await.unwrap();
        assert_eq!(redirect.url, long_url);
    }

    #[tokio::test]
    async fn test_distinct_submissions_resolve_independently() {
        let service = sqlite_service().await;
        let first_url = "https://example.com/first";
        let second_url = "https://example.org/second?q=1";

        let first = service.submit(first_url).await.unwrap();
        let second = service.submit(second_url).await.unwrap();
        assert_ne!(first.short_token, second.short_token);

        for _ in 0..3 {
            let first_redirect = service.resolve(first.short_token.as_str()).await.unwrap();
            let second_redirect = service.resolve(second.short_token.as_str()).await.unwrap();
            assert_eq!(first_redirect.url, first_url);
            assert_eq!(second_redirect.url, second_url);
        }
    }

    #[tokio::test]
    async fn test_never_issued_token_against_sqlite() {
        let service = sqlite_service().await;
        service.submit("https://example.com/").await.unwrap();

        let result = service.resolve("0000000").await.unwrap_err();
        assert!(matches!(result, ResolveError::NotFound));
    }
}
