//! Write and query port of the store.

use std::sync::Arc;

use crate::domain::{
    Entity, HistoryRequest, Portfolio, PortfolioSearchRequest, Position, PositionSearchRequest,
    SearchResult, UniqueId, WriteReceipt, WriteRequest,
};
use crate::error::Result;

use super::source::PositionSource;

/// Insert-only writer plus history and search over the four entity kinds.
///
/// Conflicting writes fail with `NotLatestVersion` or `NotLatestCorrection`
/// and are never retried here.
pub trait PositionMaster: PositionSource {
    fn write(&self, request: WriteRequest) -> Result<WriteReceipt>;

    fn add(&self, entity: impl Into<Entity>) -> Result<WriteReceipt>
    where
        Self: Sized,
    {
        self.write(WriteRequest::Add(entity.into()))
    }

    fn update(&self, target: &UniqueId, entity: impl Into<Entity>) -> Result<WriteReceipt>
    where
        Self: Sized,
    {
        self.write(WriteRequest::Update {
            target: target.clone(),
            entity: entity.into(),
        })
    }

    fn remove(&self, target: &UniqueId) -> Result<WriteReceipt>
    where
        Self: Sized,
    {
        self.write(WriteRequest::Remove {
            target: target.clone(),
        })
    }

    fn correct(&self, target: &UniqueId, entity: impl Into<Entity>) -> Result<WriteReceipt>
    where
        Self: Sized,
    {
        self.write(WriteRequest::Correct {
            target: target.clone(),
            entity: entity.into(),
        })
    }

    /// Rows of one object, newest first.
    fn history(&self, request: &HistoryRequest) -> Result<SearchResult<Entity>>;

    fn search_portfolios(
        &self,
        request: &PortfolioSearchRequest,
    ) -> Result<SearchResult<Arc<Portfolio>>>;

    fn search_positions(
        &self,
        request: &PositionSearchRequest,
    ) -> Result<SearchResult<Arc<Position>>>;
}
