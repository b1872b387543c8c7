//! Service container for dependency injection.
//!
//! Builds every repository and service from the database pools and the
//! application configuration, and owns the lifecycle of the background tasks
//! (scrape workers and the stale page sweeper).

use std::sync::Arc;

use tracing::info;

use crate::Result;
use crate::api::AppState;
use crate::auth::{AuthService, TokenService};
use crate::config::AppConfig;
use crate::database::DbPools;
use crate::database::repositories::{
    JobRepository, PageRepository, SqlxJobRepository, SqlxPageRepository, SqlxUserRepository,
    UserRepository,
};
use crate::scraper::{Fetcher, JobQueue, PageService, StaleSweeper, WorkerPool};

/// Service container holding all application services.
pub struct ServiceContainer {
    pub pools: DbPools,
    pub users: Arc<dyn UserRepository>,
    pub pages: Arc<dyn PageRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub queue: Arc<JobQueue>,
    pub page_service: Arc<PageService>,
    pub tokens: Arc<TokenService>,
    pub auth: Arc<AuthService>,
    pub worker_pool: WorkerPool,
    pub sweeper: StaleSweeper,
    fetcher: Arc<dyn Fetcher>,
}

impl ServiceContainer {
    pub fn new(pools: DbPools, config: &AppConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(
            pools.read.clone(),
            pools.write.clone(),
        ));
        let pages: Arc<dyn PageRepository> = Arc::new(SqlxPageRepository::new(
            pools.read.clone(),
            pools.write.clone(),
        ));
        let jobs: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(
            pools.read.clone(),
            pools.write.clone(),
        ));

        let queue = Arc::new(JobQueue::with_config(config.queue.clone(), jobs.clone()));
        let page_service = Arc::new(PageService::new(pages.clone(), queue.clone()));

        let tokens = Arc::new(TokenService::new(&config.tokens));
        let auth = Arc::new(AuthService::new(
            users.clone(),
            tokens.clone(),
            config.auth.clone(),
        ));

        let worker_pool = WorkerPool::with_config(config.workers.clone());
        let sweeper = StaleSweeper::new(config.sweeper.clone(), queue.clone(), pages.clone());

        Self {
            pools,
            users,
            pages,
            jobs,
            queue,
            page_service,
            tokens,
            auth,
            worker_pool,
            sweeper,
            fetcher,
        }
    }

    /// State shared by the API handlers.
    pub fn app_state(&self) -> AppState {
        AppState::new(self.auth.clone(), self.page_service.clone())
    }

    /// Recover interrupted jobs, then start the workers and the sweeper.
    pub async fn start_background_tasks(&self) -> Result<()> {
        self.queue.recover().await?;
        self.worker_pool
            .start(self.queue.clone(), self.pages.clone(), self.fetcher.clone());
        self.sweeper.start();
        Ok(())
    }

    /// Stop the background tasks, draining in-flight jobs, and close the pools.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.sweeper.stop().await;
        self.worker_pool.stop().await;
        self.pools.close().await;
        info!("Services shut down");
    }
}
