//! Ordered collections and pages served by the read endpoints.

use serde::{Deserialize, Serialize};
use url::Url;

use super::object::StringList;
use super::property::ObjectProperty;

/// An `OrderedCollection` envelope: totals plus first/last page links,
/// with no items of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderedCollection {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "StringList::is_empty"
    )]
    pub context: StringList,

    pub id: Url,

    #[serde(rename = "type")]
    pub collection_type: String,

    #[serde(rename = "totalItems")]
    pub total_items: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<Url>,
}

impl OrderedCollection {
    pub fn new(id: Url, total_items: usize, first: Option<Url>, last: Option<Url>) -> Self {
        Self {
            context: super::CONTEXT_ACTIVITY_STREAMS.into(),
            id,
            collection_type: "OrderedCollection".to_string(),
            total_items,
            first,
            last,
        }
    }
}

/// A single `OrderedCollectionPage`.
///
/// `prev` and `next` are omitted when the neighboring page would be out
/// of range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderedCollectionPage {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "StringList::is_empty"
    )]
    pub context: StringList,

    pub id: Url,

    #[serde(rename = "type")]
    pub collection_type: String,

    #[serde(rename = "totalItems")]
    pub total_items: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,

    #[serde(rename = "orderedItems", default, skip_serializing_if = "Vec::is_empty")]
    pub ordered_items: Vec<ObjectProperty>,
}

impl OrderedCollectionPage {
    pub fn new(
        id: Url,
        total_items: usize,
        ordered_items: Vec<ObjectProperty>,
        prev: Option<Url>,
        next: Option<Url>,
    ) -> Self {
        Self {
            context: super::CONTEXT_ACTIVITY_STREAMS.into(),
            id,
            collection_type: "OrderedCollectionPage".to_string(),
            total_items,
            prev,
            next,
            ordered_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn iri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn envelope_serializes_links() {
        let collection = OrderedCollection::new(
            iri("https://orb1.example.com/services/orb/inbox"),
            13,
            Some(iri("https://orb1.example.com/services/orb/inbox?page=true")),
            Some(iri(
                "https://orb1.example.com/services/orb/inbox?page=true&page-num=2",
            )),
        );

        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(value["type"], json!("OrderedCollection"));
        assert_eq!(value["totalItems"], json!(13));
        assert!(value["first"].as_str().unwrap().contains("page=true"));
    }

    #[test]
    fn page_omits_out_of_range_links() {
        let page = OrderedCollectionPage::new(
            iri("https://orb1.example.com/services/orb/inbox?page=true&page-num=0"),
            3,
            vec![ObjectProperty::Iri(iri(
                "https://orb2.example.com/services/orb",
            ))],
            None,
            None,
        );

        let value = serde_json::to_value(&page).unwrap();
        assert!(value.get("prev").is_none());
        assert!(value.get("next").is_none());
        assert_eq!(
            value["orderedItems"],
            json!(["https://orb2.example.com/services/orb"])
        );
    }
}
