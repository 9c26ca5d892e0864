//! In-memory activity store.
//!
//! Suitable for a single node; all state is lost on restart. Queries
//! snapshot the matching set under a read lock, so iterators never
//! observe later mutations.

use std::collections::HashMap;
use std::sync::RwLock;

use url::Url;

use crate::error::{AppError, Result};
use crate::vocab::{Activity, Object};

use super::{
    get_first_page_num, ActivityIterator, ActivityStore, Criteria, QueryOptions, ReferenceIterator,
    ReferenceType, SortOrder,
};

/// An in-memory [`ActivityStore`].
pub struct MemStore {
    service_name: String,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Activities in insertion order; the query baseline.
    activities: Vec<Activity>,
    /// Activity index by IRI.
    by_iri: HashMap<String, usize>,
    /// Reference sets: (type, owner IRI) -> ordered unique IRIs.
    references: HashMap<(ReferenceType, String), Vec<Url>>,
    /// Actor documents by IRI.
    actors: HashMap<String, Object>,
}

impl MemStore {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| AppError::Store(format!("store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| AppError::Store(format!("store lock poisoned: {}", e)))
    }
}

impl ActivityStore for MemStore {
    fn put_activity(&self, activity: &Activity) -> Result<()> {
        let mut inner = self.write()?;

        let iri = activity.id.to_string();

        if inner.by_iri.contains_key(&iri) {
            tracing::debug!(service = %self.service_name, activity = %iri, "activity already stored");

            return Ok(());
        }

        inner.activities.push(activity.clone());
        let index = inner.activities.len() - 1;
        inner.by_iri.insert(iri, index);

        Ok(())
    }

    fn get_activity(&self, iri: &Url) -> Result<Activity> {
        let inner = self.read()?;

        inner
            .by_iri
            .get(iri.as_str())
            .map(|&index| inner.activities[index].clone())
            .ok_or(AppError::NotFound)
    }

    fn add_reference(
        &self,
        reference_type: ReferenceType,
        object_iri: &Url,
        reference_iri: &Url,
    ) -> Result<()> {
        let mut inner = self.write()?;

        let entry = inner
            .references
            .entry((reference_type, object_iri.to_string()))
            .or_default();

        if !entry.contains(reference_iri) {
            entry.push(reference_iri.clone());
        }

        Ok(())
    }

    fn delete_reference(
        &self,
        reference_type: ReferenceType,
        object_iri: &Url,
        reference_iri: &Url,
    ) -> Result<()> {
        let mut inner = self.write()?;

        if let Some(entry) = inner
            .references
            .get_mut(&(reference_type, object_iri.to_string()))
        {
            entry.retain(|iri| iri != reference_iri);
        }

        Ok(())
    }

    fn get_references(
        &self,
        reference_type: ReferenceType,
        object_iri: &Url,
    ) -> Result<Box<dyn ReferenceIterator>> {
        self.query_references(
            reference_type,
            &Criteria::new().with_object_iri(object_iri.clone()),
            &QueryOptions::default(),
        )
    }

    fn query_activities(
        &self,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Box<dyn ActivityIterator>> {
        let inner = self.read()?;

        let candidates: Vec<Activity> = match criteria.reference_type {
            Some(reference_type) => {
                let object_iri = criteria.object_iri.as_ref().ok_or_else(|| {
                    AppError::Validation(
                        "object IRI is required for reference-type queries".to_string(),
                    )
                })?;

                inner
                    .references
                    .get(&(reference_type, object_iri.to_string()))
                    .map(|refs| {
                        refs.iter()
                            .filter_map(|iri| {
                                inner
                                    .by_iri
                                    .get(iri.as_str())
                                    .map(|&index| inner.activities[index].clone())
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
            None => inner.activities.clone(),
        };

        let matching: Vec<Activity> = candidates
            .into_iter()
            .filter(|activity| {
                criteria.activity_types.is_empty()
                    || activity
                        .kind()
                        .map(|kind| criteria.activity_types.contains(&kind))
                        .unwrap_or(false)
            })
            .collect();

        let (page, total) = apply_paging(matching, options);

        Ok(Box::new(MemActivityIterator::new(page, total)))
    }

    fn query_references(
        &self,
        reference_type: ReferenceType,
        criteria: &Criteria,
        options: &QueryOptions,
    ) -> Result<Box<dyn ReferenceIterator>> {
        let inner = self.read()?;

        let object_iri = criteria.object_iri.as_ref().ok_or_else(|| {
            AppError::Validation("object IRI is required for reference queries".to_string())
        })?;

        let references = inner
            .references
            .get(&(reference_type, object_iri.to_string()))
            .cloned()
            .unwrap_or_default();

        let (page, total) = apply_paging(references, options);

        Ok(Box::new(MemReferenceIterator::new(page, total)))
    }

    fn put_actor(&self, actor: &Object) -> Result<()> {
        let iri = actor
            .id
            .as_ref()
            .ok_or_else(|| AppError::Validation("actor is missing an ID".to_string()))?
            .to_string();

        let mut inner = self.write()?;
        inner.actors.insert(iri, actor.clone());

        Ok(())
    }

    fn get_actor(&self, iri: &Url) -> Result<Object> {
        let inner = self.read()?;

        inner
            .actors
            .get(iri.as_str())
            .cloned()
            .ok_or(AppError::NotFound)
    }
}

/// Slice the matching set down to the requested page.
///
/// Pages are fixed ascending chunks of the insertion-ordered set; a
/// descending query walks the chunks from the highest page number down
/// and reverses the items within each chunk.
fn apply_paging<T>(items: Vec<T>, options: &QueryOptions) -> (Vec<T>, usize) {
    let total = items.len();

    let mut page: Vec<T> = match options.page_size {
        None => items,
        Some(page_size) => {
            let page_num = options
                .page_num
                .unwrap_or_else(|| get_first_page_num(total, page_size, options.sort_order));

            let start = page_num.saturating_mul(page_size);

            if start >= total || page_size == 0 {
                Vec::new()
            } else {
                items
                    .into_iter()
                    .skip(start)
                    .take(page_size)
                    .collect()
            }
        }
    };

    if options.sort_order == SortOrder::Descending {
        page.reverse();
    }

    (page, total)
}

struct MemActivityIterator {
    items: std::vec::IntoIter<Activity>,
    total_items: usize,
}

impl MemActivityIterator {
    fn new(items: Vec<Activity>, total_items: usize) -> Self {
        Self {
            items: items.into_iter(),
            total_items,
        }
    }
}

impl ActivityIterator for MemActivityIterator {
    fn next(&mut self) -> Result<Activity> {
        self.items.next().ok_or(AppError::NotFound)
    }

    fn total_items(&self) -> usize {
        self.total_items
    }
}

struct MemReferenceIterator {
    items: std::vec::IntoIter<Url>,
    total_items: usize,
}

impl MemReferenceIterator {
    fn new(items: Vec<Url>, total_items: usize) -> Self {
        Self {
            items: items.into_iter(),
            total_items,
        }
    }
}

impl ReferenceIterator for MemReferenceIterator {
    fn next(&mut self) -> Result<Url> {
        self.items.next().ok_or(AppError::NotFound)
    }

    fn total_items(&self) -> usize {
        self.total_items
    }
}
