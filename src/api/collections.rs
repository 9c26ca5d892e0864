//! ActivityPub read endpoints
//!
//! - Service actor document
//! - Inbox / outbox collections (outbox public-filtered when the caller
//!   is not authorized)
//! - Followers / following collections
//! - Likes / shares of an object
//! - Single activities
//!
//! Every collection endpoint serves an `OrderedCollection` envelope by
//! default and an `OrderedCollectionPage` when `page=true`.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::store::{
    get_first_page_num, get_last_page_num, read_activities, read_references, Criteria,
    QueryOptions, ReferenceType, SortOrder,
};
use crate::vocab::{ObjectProperty, OrderedCollection, OrderedCollectionPage};
use crate::AppState;

const LD_JSON: &str = "application/ld+json";

/// Query parameters accepted by the collection endpoints.
#[derive(Debug, Deserialize)]
pub struct PageParams {
    page: Option<bool>,
    #[serde(rename = "page-num")]
    page_num: Option<usize>,
    id: Option<String>,
}

impl PageParams {
    fn is_paging(&self) -> bool {
        self.page == Some(true)
    }
}

/// Create the ActivityPub router
///
/// Routes:
/// - GET /services/:name - Service actor document
/// - GET /services/:name/inbox - Received activities
/// - GET /services/:name/outbox - Sent activities
/// - GET /services/:name/followers - Follower IRIs
/// - GET /services/:name/following - Following IRIs
/// - GET /services/:name/liked - Liked object IRIs
/// - GET /services/:name/likes?id=<iri> - Like activities for an object
/// - GET /services/:name/shares?id=<iri> - Announce activities for an object
/// - GET /services/:name/activities/:id - Single activity
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/services/:name", get(service_actor))
        .route("/services/:name/inbox", get(inbox))
        .route("/services/:name/outbox", get(outbox))
        .route("/services/:name/followers", get(followers))
        .route("/services/:name/following", get(following))
        .route("/services/:name/liked", get(liked))
        .route("/services/:name/likes", get(likes))
        .route("/services/:name/shares", get(shares))
        .route("/services/:name/activities/:id", get(activity))
}

/// GET /services/:name
///
/// Returns the ActivityPub actor document of the local service.
async fn service_actor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    ensure_service(&state, &name)?;

    let service_iri = state.config.service_iri();

    let body = serde_json::json!({
        "@context": [
            crate::vocab::CONTEXT_ACTIVITY_STREAMS,
            crate::vocab::CONTEXT_ACTIVITY_ANCHORS
        ],
        "id": service_iri.as_str(),
        "type": crate::vocab::TYPE_SERVICE,
        "inbox": format!("{}/inbox", service_iri),
        "outbox": format!("{}/outbox", service_iri),
        "followers": format!("{}/followers", service_iri),
        "following": format!("{}/following", service_iri),
        "liked": format!("{}/liked", service_iri),
    });

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/services/:name", "200"])
        .inc();

    Ok(ld_json(body))
}

/// GET /services/:name/inbox
async fn inbox(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/services/:name/inbox"])
        .start_timer();

    ensure_service(&state, &name)?;
    require_authorized(&state, &headers, "/services/{name}/inbox").await?;

    let owner = state.config.service_iri();
    let id = collection_id(&owner, "inbox")?;

    activity_collection(&state, ReferenceType::Inbox, &owner, &id, &params)
}

/// GET /services/:name/outbox
///
/// An authorized caller sees the full outbox; anyone else sees only the
/// activities addressed to the public audience.
async fn outbox(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    ensure_service(&state, &name)?;

    let authorized = is_authorized(&state, &headers, "/services/{name}/outbox").await?;

    let reference_type = if authorized {
        ReferenceType::Outbox
    } else {
        ReferenceType::PublicOutbox
    };

    let owner = state.config.service_iri();
    let id = collection_id(&owner, "outbox")?;

    activity_collection(&state, reference_type, &owner, &id, &params)
}

/// GET /services/:name/followers
async fn followers(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    ensure_service(&state, &name)?;
    require_authorized(&state, &headers, "/services/{name}/followers").await?;

    let owner = state.config.service_iri();
    let id = collection_id(&owner, "followers")?;

    reference_collection(&state, ReferenceType::Follower, &owner, &id, &params)
}

/// GET /services/:name/following
async fn following(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    ensure_service(&state, &name)?;
    require_authorized(&state, &headers, "/services/{name}/following").await?;

    let owner = state.config.service_iri();
    let id = collection_id(&owner, "following")?;

    reference_collection(&state, ReferenceType::Following, &owner, &id, &params)
}

/// GET /services/:name/liked
async fn liked(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    ensure_service(&state, &name)?;
    require_authorized(&state, &headers, "/services/{name}/liked").await?;

    let owner = state.config.service_iri();
    let id = collection_id(&owner, "liked")?;

    reference_collection(&state, ReferenceType::Liked, &owner, &id, &params)
}

/// GET /services/:name/likes?id=<iri>
async fn likes(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    ensure_service(&state, &name)?;
    require_authorized(&state, &headers, "/services/{name}/likes").await?;

    let object_iri = object_iri_param(&params)?;
    let id = object_collection_id(&state.config.service_iri(), "likes", &object_iri)?;

    activity_collection(&state, ReferenceType::Like, &object_iri, &id, &params)
}

/// GET /services/:name/shares?id=<iri>
async fn shares(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response> {
    ensure_service(&state, &name)?;
    require_authorized(&state, &headers, "/services/{name}/shares").await?;

    let object_iri = object_iri_param(&params)?;
    let id = object_collection_id(&state.config.service_iri(), "shares", &object_iri)?;

    activity_collection(&state, ReferenceType::Share, &object_iri, &id, &params)
}

/// GET /services/:name/activities/:id
///
/// Returns the activity directly. A caller that is not authorized may
/// only read activities addressed to the public audience.
async fn activity(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/services/:name/activities/:id"])
        .start_timer();

    ensure_service(&state, &name)?;

    let authorized = is_authorized(&state, &headers, "/services/{name}/activities").await?;

    let activity_iri = format!("{}/activities/{}", state.config.service_iri(), id);
    let activity_iri = Url::parse(&activity_iri)
        .map_err(|e| AppError::BadRequest(format!("invalid activity ID [{}]: {}", id, e)))?;

    let activity = state.store.get_activity(&activity_iri)?;

    if !authorized && !activity.is_public() {
        return Err(AppError::Unauthorized);
    }

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/services/:name/activities/:id", "200"])
        .inc();

    Ok(ld_json(serde_json::to_value(&activity)?))
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_service(state: &AppState, name: &str) -> Result<()> {
    if name != state.config.service.name {
        return Err(AppError::NotFound);
    }

    Ok(())
}

async fn is_authorized(state: &AppState, headers: &HeaderMap, endpoint: &str) -> Result<bool> {
    super::authorize(
        state.verifier.as_ref(),
        state.token_manager.as_ref(),
        headers,
        endpoint,
        "GET",
    )
    .await
}

async fn require_authorized(state: &AppState, headers: &HeaderMap, endpoint: &str) -> Result<()> {
    if !is_authorized(state, headers, endpoint).await? {
        return Err(AppError::Unauthorized);
    }

    Ok(())
}

fn collection_id(owner: &Url, suffix: &str) -> Result<Url> {
    Url::parse(&format!("{}/{}", owner, suffix))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid collection IRI: {}", e)))
}

fn object_collection_id(owner: &Url, suffix: &str, object_iri: &Url) -> Result<Url> {
    let mut id = collection_id(owner, suffix)?;

    id.query_pairs_mut().append_pair("id", object_iri.as_str());

    Ok(id)
}

fn object_iri_param(params: &PageParams) -> Result<Url> {
    let id = params
        .id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("id not specified in URL".to_string()))?;

    Url::parse(id).map_err(|e| AppError::BadRequest(format!("invalid id [{}]: {}", id, e)))
}

fn page_url(base: &Url, page_num: Option<usize>) -> Url {
    let mut url = base.clone();

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("page", "true");

        if let Some(page_num) = page_num {
            query.append_pair("page-num", &page_num.to_string());
        }
    }

    url
}

/// Neighboring page numbers in traversal order; `None` when out of
/// range.
fn prev_next(
    total: usize,
    page_size: usize,
    page_num: usize,
    sort_order: SortOrder,
) -> (Option<usize>, Option<usize>) {
    match sort_order {
        SortOrder::Ascending => {
            let last = get_last_page_num(total, page_size, sort_order);

            let prev = page_num.checked_sub(1).filter(|n| *n <= last);
            let next = (page_num < last).then_some(page_num + 1);

            (prev, next)
        }
        SortOrder::Descending => {
            let first = get_first_page_num(total, page_size, sort_order);

            let prev = (page_num < first).then_some(page_num + 1);
            let next = page_num.checked_sub(1).filter(|n| *n <= first);

            (prev, next)
        }
    }
}

/// Serve a collection whose items are activities referenced by the
/// given set.
fn activity_collection(
    state: &AppState,
    reference_type: ReferenceType,
    owner: &Url,
    id: &Url,
    params: &PageParams,
) -> Result<Response> {
    let page_size = state.config.service.page_size;
    let sort_order = SortOrder::Ascending;

    if !params.is_paging() {
        let mut it = state.store.query_references(
            reference_type,
            &Criteria::new().with_object_iri(owner.clone()),
            &QueryOptions::default(),
        )?;

        let total = it.total_items();
        it.close();

        return Ok(ld_json(serde_json::to_value(&envelope(
            id, total, page_size, sort_order,
        ))?));
    }

    let criteria = Criteria::new()
        .with_reference_type(reference_type)
        .with_object_iri(owner.clone());

    let mut options = QueryOptions::new()
        .with_page_size(page_size)
        .with_sort_order(sort_order);
    if let Some(page_num) = params.page_num {
        options = options.with_page_num(page_num);
    }

    let mut it = state.store.query_activities(&criteria, &options)?;

    let total = it.total_items();
    let activities = read_activities(it.as_mut(), page_size)?;
    it.close();

    let items = activities
        .into_iter()
        .map(ObjectProperty::from)
        .collect::<Vec<_>>();

    Ok(ld_json(serde_json::to_value(&page(
        id, total, page_size, sort_order, params, items,
    ))?))
}

/// Serve a collection whose items are the reference IRIs themselves.
fn reference_collection(
    state: &AppState,
    reference_type: ReferenceType,
    owner: &Url,
    id: &Url,
    params: &PageParams,
) -> Result<Response> {
    let page_size = state.config.service.page_size;
    let sort_order = SortOrder::Ascending;

    let criteria = Criteria::new().with_object_iri(owner.clone());

    if !params.is_paging() {
        let mut it =
            state
                .store
                .query_references(reference_type, &criteria, &QueryOptions::default())?;

        let total = it.total_items();
        it.close();

        return Ok(ld_json(serde_json::to_value(&envelope(
            id, total, page_size, sort_order,
        ))?));
    }

    let mut options = QueryOptions::new()
        .with_page_size(page_size)
        .with_sort_order(sort_order);
    if let Some(page_num) = params.page_num {
        options = options.with_page_num(page_num);
    }

    let mut it = state
        .store
        .query_references(reference_type, &criteria, &options)?;

    let total = it.total_items();
    let references = read_references(it.as_mut(), page_size)?;
    it.close();

    let items = references
        .into_iter()
        .map(ObjectProperty::Iri)
        .collect::<Vec<_>>();

    Ok(ld_json(serde_json::to_value(&page(
        id, total, page_size, sort_order, params, items,
    ))?))
}

fn envelope(
    id: &Url,
    total: usize,
    page_size: usize,
    sort_order: SortOrder,
) -> OrderedCollection {
    let first = page_url(id, None);
    let last = page_url(id, Some(get_last_page_num(total, page_size, sort_order)));

    OrderedCollection::new(id.clone(), total, Some(first), Some(last))
}

fn page(
    id: &Url,
    total: usize,
    page_size: usize,
    sort_order: SortOrder,
    params: &PageParams,
    items: Vec<ObjectProperty>,
) -> OrderedCollectionPage {
    let page_num = params
        .page_num
        .unwrap_or_else(|| get_first_page_num(total, page_size, sort_order));

    let (prev, next) = prev_next(total, page_size, page_num, sort_order);

    OrderedCollectionPage::new(
        page_url(id, Some(page_num)),
        total,
        items,
        prev.map(|n| page_url(id, Some(n))),
        next.map(|n| page_url(id, Some(n))),
    )
}

fn ld_json(body: serde_json::Value) -> Response {
    ([(header::CONTENT_TYPE, LD_JSON)], Json(body)).into_response()
}
