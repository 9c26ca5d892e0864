//! Activity store SPI
//!
//! The abstract query surface consumed by the activity handler and the
//! REST read handlers: activities, actors, reference sets and snapshot
//! iterators with paging.

mod memstore;

pub use memstore::MemStore;

use url::Url;

use crate::error::{AppError, Result};
use crate::vocab::{Activity, ActivityKind, Object};

/// The named reference sets maintained by the store.
///
/// Each set is keyed by an owner IRI and stores IRIs with insertion
/// order preserved and uniqueness enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Inbox,
    Outbox,
    PublicOutbox,
    Follower,
    Following,
    Witness,
    Like,
    Liked,
    Share,
    AnchorCredential,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "INBOX",
            Self::Outbox => "OUTBOX",
            Self::PublicOutbox => "PUBLIC_OUTBOX",
            Self::Follower => "FOLLOWER",
            Self::Following => "FOLLOWING",
            Self::Witness => "WITNESS",
            Self::Like => "LIKE",
            Self::Liked => "LIKED",
            Self::Share => "SHARE",
            Self::AnchorCredential => "ANCHOR_CREDENTIAL",
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort order for queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Query criteria: all present fields must match.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub activity_types: Vec<ActivityKind>,
    pub object_iri: Option<Url>,
    pub reference_type: Option<ReferenceType>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activity_type(mut self, kind: ActivityKind) -> Self {
        self.activity_types.push(kind);
        self
    }

    pub fn with_object_iri(mut self, iri: Url) -> Self {
        self.object_iri = Some(iri);
        self
    }

    pub fn with_reference_type(mut self, reference_type: ReferenceType) -> Self {
        self.reference_type = Some(reference_type);
        self
    }
}

/// Paging and ordering options for queries.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Items per page. When unset, the full result set is returned.
    pub page_size: Option<usize>,
    /// 0-based page number. When unset with a page size, the first page
    /// in traversal order is returned.
    pub page_num: Option<usize>,
    pub sort_order: SortOrder,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_page_num(mut self, page_num: usize) -> Self {
        self.page_num = Some(page_num);
        self
    }

    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }
}

/// An iterator over activities matching a query.
///
/// `next` yields `NotFound` at end-of-stream. `total_items` is a
/// snapshot of the total match count captured at query time, before
/// paging was applied.
pub trait ActivityIterator: Send {
    fn next(&mut self) -> Result<Activity>;

    fn total_items(&self) -> usize;

    fn close(&mut self) {}
}

/// An iterator over reference IRIs matching a query.
pub trait ReferenceIterator: Send {
    fn next(&mut self) -> Result<Url>;

    fn total_items(&self) -> usize;

    fn close(&mut self) {}
}

/// The activity store capability set.
///
/// Implementations must provide per-entity atomicity for puts and
/// reference mutations.
pub trait ActivityStore: Send + Sync {
    /// Store an activity. Re-putting an activity with a stored ID is a
    /// no-op.
    fn put_activity(&self, activity: &Activity) -> Result<()>;

    /// Retrieve an activity by IRI; `NotFound` when absent.
    fn get_activity(&self, iri: &Url) -> Result<Activity>;

    /// Add `reference_iri` to the set of the given type owned by
    /// `object_iri`. Duplicates are ignored.
    fn add_reference(
        &self,
        reference_type: ReferenceType,
        object_iri: &Url,
        reference_iri: &Url,
    ) -> Result<()>;

    /// Remove `reference_iri` from the set; removing an absent entry is
    /// a no-op.
    fn delete_reference(
        &self,
        reference_type: ReferenceType,
        object_iri: &Url,
        reference_iri: &Url,
    ) -> Result<()>;

    /// All references of the given type owned by `object_iri`.
    fn get_references(
        &self,
        reference_type: ReferenceType,
        object_iri: &Url,
    ) -> Result<Box<dyn ReferenceIterator>>;

    /// Query activities by criteria with paging.
    fn query_activities(
        &self,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Box<dyn ActivityIterator>>;

    /// Query reference IRIs of the given type with paging.
    fn query_references(
        &self,
        reference_type: ReferenceType,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Box<dyn ReferenceIterator>>;

    /// Store an actor document, replacing any previous version.
    fn put_actor(&self, actor: &Object) -> Result<()>;

    /// Retrieve an actor by IRI; `NotFound` when absent.
    fn get_actor(&self, iri: &Url) -> Result<Object>;
}

/// The first page number in traversal order for the given sort order.
pub fn get_first_page_num(total_items: usize, page_size: usize, sort_order: SortOrder) -> usize {
    match sort_order {
        SortOrder::Ascending => 0,
        SortOrder::Descending => get_last_ascending_page(total_items, page_size),
    }
}

/// The last page number in traversal order for the given sort order.
pub fn get_last_page_num(total_items: usize, page_size: usize, sort_order: SortOrder) -> usize {
    match sort_order {
        SortOrder::Ascending => get_last_ascending_page(total_items, page_size),
        SortOrder::Descending => 0,
    }
}

fn get_last_ascending_page(total_items: usize, page_size: usize) -> usize {
    if total_items == 0 || page_size == 0 {
        return 0;
    }

    (total_items + page_size - 1) / page_size - 1
}

/// Drain up to `max` activities from an iterator.
pub fn read_activities(it: &mut dyn ActivityIterator, max: usize) -> Result<Vec<Activity>> {
    let mut activities = Vec::new();

    while activities.len() < max {
        match it.next() {
            Ok(activity) => activities.push(activity),
            Err(err) if err.is_not_found() => break,
            Err(err) => return Err(err),
        }
    }

    Ok(activities)
}

/// Drain up to `max` references from an iterator.
pub fn read_references(it: &mut dyn ReferenceIterator, max: usize) -> Result<Vec<Url>> {
    let mut references = Vec::new();

    while references.len() < max {
        match it.next() {
            Ok(reference) => references.push(reference),
            Err(err) if err.is_not_found() => break,
            Err(err) => return Err(err),
        }
    }

    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_is_sort_order_aware() {
        assert_eq!(get_last_page_num(13, 5, SortOrder::Ascending), 2);
        assert_eq!(get_last_page_num(13, 5, SortOrder::Descending), 0);
        assert_eq!(get_last_page_num(10, 5, SortOrder::Ascending), 1);
        assert_eq!(get_last_page_num(0, 5, SortOrder::Ascending), 0);
    }

    #[test]
    fn first_page_is_sort_order_aware() {
        assert_eq!(get_first_page_num(13, 5, SortOrder::Ascending), 0);
        assert_eq!(get_first_page_num(13, 5, SortOrder::Descending), 2);
        assert_eq!(get_first_page_num(0, 5, SortOrder::Descending), 0);
    }
}
