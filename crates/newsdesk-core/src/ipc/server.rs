//! IPC Server for daemon
//!
//! Listens on Unix socket and handles client requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::config::AppConfig;
use crate::news::{
    CategoryCache, NewsCatcherClient, NewsCorpus, NewsSource, SearchQuery, CATEGORIES,
};
use crate::recommend::{RecommendationClient, RecommendationMerge, SearchClient};
use crate::scheduler::JobBoard;
use crate::storage::{CategoryRepository, Database, UserRepository};
use crate::{Error, Result};

/// Maximum number of concurrent IPC requests to prevent connection pool exhaustion
const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Everything a request handler can reach
pub struct DaemonState {
    pub db: Database,
    pub corpus: NewsCorpus,
    pub news: Option<Arc<dyn NewsSource>>,
    pub cache: Option<Arc<CategoryCache>>,
    pub recommendations: Option<Arc<RecommendationMerge>>,
    pub search: Option<Arc<SearchClient>>,
    pub jobs: Option<JobBoard>,
    pub deletion_grace: chrono::Duration,
}

impl DaemonState {
    pub fn new(db: Database, corpus: NewsCorpus, deletion_grace: chrono::Duration) -> Self {
        Self {
            db,
            corpus,
            news: None,
            cache: None,
            recommendations: None,
            search: None,
            jobs: None,
            deletion_grace,
        }
    }

    /// Build the full state from a validated configuration
    pub fn from_config(db: Database, config: &AppConfig) -> Result<Self> {
        let news: Arc<dyn NewsSource> = Arc::new(NewsCatcherClient::new(config)?);
        let cache = Arc::new(CategoryCache::from_config(news.clone(), config));
        let merge =
            RecommendationMerge::new(Arc::new(RecommendationClient::new(config)?), news.clone());

        Ok(Self::new(
            db,
            NewsCorpus::new(config.corpus_path()),
            config.scheduler.deletion_grace(),
        )
        .with_news(news)
        .with_cache(cache)
        .with_recommendations(Arc::new(merge))
        .with_search(Arc::new(SearchClient::new(config)?)))
    }

    pub fn with_news(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn with_cache(mut self, cache: Arc<CategoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_recommendations(mut self, merge: Arc<RecommendationMerge>) -> Self {
        self.recommendations = Some(merge);
        self
    }

    pub fn with_search(mut self, search: Arc<SearchClient>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_jobs(mut self, jobs: JobBoard) -> Self {
        self.jobs = Some(jobs);
        self
    }
}

/// IPC Server that handles client connections
pub struct DaemonServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
    start_time: Instant,
    /// Semaphore to limit concurrent request processing
    request_semaphore: Arc<Semaphore>,
}

impl DaemonServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self {
            state,
            socket_path,
            start_time: Instant::now(),
            request_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        }
    }

    /// Run the IPC server
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on: {}", self.socket_path.display());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let state = self.state.clone();
                            let start_time = self.start_time;
                            let semaphore = self.request_semaphore.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state, start_time, semaphore).await {
                                    warn!("Error handling connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("IPC server shutting down");
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<DaemonState>,
    start_time: Instant,
    semaphore: Arc<Semaphore>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| Error::Other(format!("Failed to acquire semaphore: {}", e)))?;

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Received request: {} (id: {})", request.method, request.id);
                handle_request(request, &state, start_time).await
            }
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

fn error_code(error: &Error) -> i32 {
    match error {
        Error::InvalidInput(_) => ERR_INVALID_PARAMS,
        Error::UserNotFound(_) => ERR_NOT_FOUND,
        Error::Config(_) => ERR_UNAVAILABLE,
        _ => ERR_INTERNAL,
    }
}

fn reply<T: Serialize>(id: Uuid, result: Result<T>) -> Response {
    match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
        Ok(value) => Response::success(id, value),
        Err(e) => {
            error!("Request {} failed: {}", id, e);
            Response::error(id, error_code(&e), e.to_string())
        }
    }
}

fn parse<T: DeserializeOwned>(id: Uuid, params: serde_json::Value) -> std::result::Result<T, Response> {
    serde_json::from_value(params).map_err(|e| Response::error(id, ERR_INVALID_PARAMS, e.to_string()))
}

fn require<'a, T: ?Sized>(value: &'a Option<Arc<T>>, name: &str) -> Result<&'a T> {
    value
        .as_deref()
        .ok_or_else(|| Error::Config(format!("{} is not configured", name)))
}

macro_rules! params {
    ($id:expr, $value:expr) => {
        match parse($id, $value) {
            Ok(params) => params,
            Err(response) => return response,
        }
    };
}

pub(crate) async fn handle_request(request: Request, state: &DaemonState, start_time: Instant) -> Response {
    let id = request.id;

    match request.method.as_str() {
        methods::PING => Response::success(id, serde_json::json!({"ok": true})),

        methods::STATUS => reply(
            id,
            Ok(StatusResponse {
                running: true,
                uptime_secs: start_time.elapsed().as_secs(),
                cached_categories: state.cache.as_ref().map_or(0, |c| c.len()),
                jobs: state.jobs.as_ref().map(|b| b.snapshot()).unwrap_or_default(),
            }),
        ),

        methods::NEWS_BY_CATEGORY => {
            let params: CategoryParams = params!(id, request.params);
            let result = match require(&state.cache, "news provider") {
                Ok(cache) => {
                    let articles = cache
                        .get_by_category(&params.category, &params.language, &params.country)
                        .await;
                    Ok(CategoryNewsResponse {
                        articles,
                        cache_state: cache.entry_state(
                            &params.category,
                            &params.language,
                            &params.country,
                        ),
                    })
                }
                Err(e) => Err(e),
            };
            reply(id, result)
        }

        methods::NEWS_SEARCH => {
            let params: NewsSearchParams = params!(id, request.params);
            let categories: Vec<String> = params
                .categories
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if categories.is_empty() {
                return reply::<()>(id, Err(Error::InvalidInput("no categories given".into())));
            }

            let query = SearchQuery {
                page: params.page.max(1),
                page_size: params.page_size,
                language: params.language,
                country: params.country,
                ..SearchQuery::new(categories)
            };
            let result = match require(&state.news, "news provider") {
                Ok(news) => news
                    .search(&query)
                    .await
                    .map(|articles| ArticleListResponse { articles }),
                Err(e) => Err(e),
            };
            reply(id, result)
        }

        methods::NEWS_INVALIDATE => {
            let params: InvalidateParams = params!(id, request.params);
            let result = require(&state.cache, "news provider").map(|cache| InvalidateResponse {
                removed: cache.invalidate(&params.category),
            });
            reply(id, result)
        }

        methods::NEWS_GET => {
            let params: ArticleIdParams = params!(id, request.params);
            let result = match require(&state.recommendations, "recommendation service") {
                Ok(merge) => Ok(ArticleResponse {
                    article: merge.find_article(&params.user_id, &params.id).await,
                }),
                Err(e) => Err(e),
            };
            reply(id, result)
        }

        methods::NEWS_ALL => {
            let params: AllNewsParams = params!(id, request.params);
            let articles = state
                .corpus
                .all_news(&params.categories, params.page_number, params.page_size)
                .await;
            reply(id, Ok(ArticleListResponse { articles }))
        }

        methods::NEWS_CATEGORIES => {
            let repo = CategoryRepository::new(&state.db);
            let result = match repo.seed_if_empty(CATEGORIES).await {
                Ok(_) => repo.list().await,
                Err(e) => Err(e),
            };
            reply(id, result.map(|categories| CategoryListResponse { categories }))
        }

        methods::RECOMMENDATION_LATEST => {
            let params: LatestParams = params!(id, request.params);
            let result = match require(&state.recommendations, "recommendation service") {
                Ok(merge) => merge
                    .latest_page(&params.user_id, params.page_number, params.page_size)
                    .await
                    .map(|articles| ArticleListResponse { articles }),
                Err(e) => Err(e),
            };
            reply(id, result)
        }

        methods::RECOMMENDATION_RECOMMEND => {
            let params: RecommendParams = params!(id, request.params);
            let result = match require(&state.recommendations, "recommendation service") {
                Ok(merge) => merge
                    .recommend(&params.topics, &params.user_id)
                    .await
                    .map(|articles| ArticleListResponse { articles }),
                Err(e) => Err(e),
            };
            reply(id, result)
        }

        methods::SEARCH => {
            let params: SearchParams = params!(id, request.params);
            let result = match require(&state.search, "search service") {
                Ok(search) => search
                    .search(&params.query)
                    .await
                    .map(|articles| ArticleListResponse { articles }),
                Err(e) => Err(e),
            };
            reply(id, result)
        }

        methods::ACCOUNT_REQUEST_DELETION => {
            let params: UserIdParams = params!(id, request.params);
            let repo = UserRepository::new(&state.db);
            let result = repo
                .request_deletion(&params.user_id, Utc::now())
                .await
                .map(|user| serde_json::json!({ "requested_at": user.deletion.requested_at() }));
            reply(id, result)
        }

        methods::ACCOUNT_RESOLVE_DELETION => {
            let params: UserIdParams = params!(id, request.params);
            let repo = UserRepository::new(&state.db);
            let result = repo
                .resolve_pending_deletion(&params.user_id, Utc::now(), state.deletion_grace)
                .await
                .map(|outcome| DeletionResponse { outcome });
            reply(id, result)
        }

        _ => Response::error(id, ERR_METHOD_NOT_FOUND, "Method not found"),
    }
}
