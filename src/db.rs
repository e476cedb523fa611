use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::Client;
use tracing::{debug, info};

use crate::convert::{self, cell, object_id_to_hex, string_list};
use crate::error::CatalogError;
use crate::models::{
    CardUser, Collection, Download, LearningObject, LearningObjectRecord, Organization, Rating,
    Resource, Submission, User,
};
use crate::resolver::{IdentifierMap, TaxonomyKind, Taxonomies};

const ONION_DB: &str = "onion";
const TOPICS_DB: &str = "topics";
const GUIDELINES_DB: &str = "standard-guidelines";
const CARD_DB: &str = "CARD";

const OBJECTS_INDEX: &str = "objects-index";
const USERS: &str = "users";
const DOWNLOADS: &str = "downloads";
const RATINGS: &str = "ratings";
const SUBMISSIONS: &str = "submissions";
const COLLECTIONS: &str = "collections";
const OBJECT_TOPICS: &str = "object-topics";
const TAGS: &str = "tags";
const ORGANIZATIONS: &str = "organizations";
const RESOURCES: &str = "resources";

/// Collections that have to exist before any report can run.
const REQUIRED_COLLECTIONS: &[(&str, &str)] = &[
    (ONION_DB, OBJECTS_INDEX),
    (TOPICS_DB, OBJECT_TOPICS),
    (GUIDELINES_DB, TAGS),
    (CARD_DB, ORGANIZATIONS),
];

pub async fn connect(uri: &str) -> Result<Client, CatalogError> {
    let client = Client::with_uri_str(uri).await?;
    verify_collections(&client).await?;
    Ok(client)
}

pub async fn verify_collections(client: &Client) -> Result<(), CatalogError> {
    for (database, collection) in REQUIRED_COLLECTIONS {
        let names = client.database(database).list_collection_names(None).await?;
        if !names.iter().any(|name| name == collection) {
            return Err(CatalogError::MissingCollection {
                database: database.to_string(),
                collection: collection.to_string(),
            });
        }
    }
    Ok(())
}

async fn find_projected(
    client: &Client,
    database: &str,
    collection: &str,
    filter: Document,
    projection: Document,
) -> Result<Vec<Document>, CatalogError> {
    let options = FindOptions::builder().projection(projection).build();
    let cursor = client
        .database(database)
        .collection::<Document>(collection)
        .find(filter, options)
        .await?;
    let documents: Vec<Document> = cursor.try_collect().await?;
    debug!(database, collection, count = documents.len(), "read collection");
    Ok(documents)
}

async fn identifier_map(
    client: &Client,
    database: &str,
    collection: &str,
    kind: TaxonomyKind,
) -> Result<IdentifierMap, CatalogError> {
    let documents =
        find_projected(client, database, collection, doc! {}, doc! { "_id": 1, "name": 1 }).await?;
    let records = documents.iter().filter_map(|record| {
        let id = record.get("_id").and_then(object_id_to_hex)?;
        Some((id, cell(record, "name").unwrap_or_default()))
    });
    Ok(IdentifierMap::build(kind, records))
}

pub async fn load_taxonomies(client: &Client) -> Result<Taxonomies, CatalogError> {
    let taxonomies = Taxonomies {
        topics: identifier_map(client, TOPICS_DB, OBJECT_TOPICS, TaxonomyKind::Topic).await?,
        tags: identifier_map(client, GUIDELINES_DB, TAGS, TaxonomyKind::Tag).await?,
        organizations: identifier_map(client, CARD_DB, ORGANIZATIONS, TaxonomyKind::Organization)
            .await?,
    };
    info!(
        topics = taxonomies.topics.len(),
        tags = taxonomies.tags.len(),
        organizations = taxonomies.organizations.len(),
        "loaded taxonomy maps"
    );
    Ok(taxonomies)
}

pub fn resolve_learning_object(
    record: LearningObjectRecord,
    taxonomies: &Taxonomies,
) -> LearningObject {
    LearningObject {
        topics: taxonomies.map_topics(&record.topics),
        tags: taxonomies.map_tags(&record.tags),
        cuid: record.cuid,
        id: record.id,
        name: record.name,
        status: record.status,
        date: record.date,
        author: record.author,
        contributors: record.contributors,
        collection: record.object_collection,
        version: record.version,
        length: record.length,
    }
}

pub async fn learning_objects(
    client: &Client,
    taxonomies: &Taxonomies,
) -> Result<Vec<LearningObject>, CatalogError> {
    let projection = doc! {
        "_id": 0,
        "cuid": 1,
        "id": 1,
        "name": 1,
        "status": 1,
        "date": 1,
        "author.username": 1,
        "author.email": 1,
        "author.name": 1,
        "contributors.name": 1,
        "contributors.organization": 1,
        "contributors.email": 1,
        "objectCollection": 1,
        "version": 1,
        "length": 1,
        "topics": 1,
        "tags": 1,
    };
    let options = FindOptions::builder().projection(projection).build();
    let cursor = client
        .database(ONION_DB)
        .collection::<LearningObjectRecord>(OBJECTS_INDEX)
        .find(None, options)
        .await?;
    let records: Vec<LearningObjectRecord> = cursor.try_collect().await?;

    Ok(records
        .into_iter()
        .map(|record| resolve_learning_object(record, taxonomies))
        .collect())
}

/// Detail-page paths (`/details/<username>/<cuid>`) of every released learning object.
pub async fn released_learning_object_paths(client: &Client) -> Result<Vec<String>, CatalogError> {
    let options = FindOptions::builder()
        .projection(doc! { "_id": 0, "cuid": 1, "author.username": 1 })
        .build();
    let cursor = client
        .database(ONION_DB)
        .collection::<LearningObjectRecord>(OBJECTS_INDEX)
        .find(doc! { "status": "released" }, options)
        .await?;
    let records: Vec<LearningObjectRecord> = cursor.try_collect().await?;

    Ok(records
        .iter()
        .filter_map(|record| detail_path(record.author.username.as_deref(), &record.cuid))
        .collect())
}

pub fn detail_path(username: Option<&str>, cuid: &str) -> Option<String> {
    match username {
        Some(username) if !username.is_empty() && !cuid.is_empty() => {
            Some(format!("/details/{username}/{cuid}"))
        }
        _ => {
            debug!(cuid, "released object has no author username, skipping");
            None
        }
    }
}

pub async fn downloads(client: &Client) -> Result<Vec<Download>, CatalogError> {
    let documents = find_projected(
        client,
        ONION_DB,
        DOWNLOADS,
        doc! {},
        doc! {
            "_id": 0,
            "Timestamp": "$timestamp",
            "cuid": "$learningObject.cuid",
            "downloadedBy": "$downloadedBy",
        },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| Download {
            timestamp: cell(record, "Timestamp"),
            cuid: cell(record, "cuid"),
            downloaded_by: record.get("downloadedBy").and_then(object_id_to_hex),
        })
        .collect())
}

pub async fn submissions(client: &Client) -> Result<Vec<Submission>, CatalogError> {
    let documents = find_projected(
        client,
        ONION_DB,
        SUBMISSIONS,
        doc! {},
        doc! {
            "_id": 0,
            "lo_id": "$learningObjectId",
            "collection": "$collection",
            "timestamp": "$timestamp",
        },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| Submission {
            lo_id: cell(record, "lo_id"),
            collection: cell(record, "collection"),
            timestamp: cell(record, "timestamp"),
        })
        .collect())
}

pub async fn ratings(client: &Client) -> Result<Vec<Rating>, CatalogError> {
    let documents = find_projected(
        client,
        ONION_DB,
        RATINGS,
        doc! {},
        doc! { "_id": 0, "value": 1, "comment": 1, "date": 1, "user": 1, "source": 1 },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| Rating {
            value: cell(record, "value"),
            comment: cell(record, "comment"),
            date: cell(record, "date"),
            user: record.get("user").and_then(object_id_to_hex),
            source: record.get("source").and_then(object_id_to_hex),
        })
        .collect())
}

pub async fn users(client: &Client) -> Result<Vec<User>, CatalogError> {
    let documents = find_projected(
        client,
        ONION_DB,
        USERS,
        doc! {},
        doc! {
            "_id": 0,
            "Name": "$name",
            "Email": "$email",
            "Org": "$organization",
            "accessGroups": "$accessGroups",
            "createdAt": "$createdAt",
        },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| User {
            name: cell(record, "Name"),
            email: cell(record, "Email"),
            organization: cell(record, "Org"),
            access_groups: string_list(record, "accessGroups"),
            created_at: cell(record, "createdAt"),
        })
        .collect())
}

pub async fn organizations(client: &Client) -> Result<Vec<Organization>, CatalogError> {
    let documents = find_projected(
        client,
        CARD_DB,
        ORGANIZATIONS,
        doc! {},
        doc! { "_id": 0, "Name": "$name", "Type": "$type" },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| Organization {
            name: cell(record, "Name"),
            kind: cell(record, "Type"),
        })
        .collect())
}

pub async fn collections(client: &Client) -> Result<Vec<Collection>, CatalogError> {
    let documents = find_projected(
        client,
        ONION_DB,
        COLLECTIONS,
        doc! {},
        doc! { "_id": 0, "name": 1, "abvName": 1 },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| Collection {
            name: cell(record, "name"),
            short_name: cell(record, "abvName"),
        })
        .collect())
}

/// Short names of every collection, used to build the collection-page filter.
pub async fn collection_short_names(client: &Client) -> Result<Vec<String>, CatalogError> {
    let mut names: Vec<String> = collections(client)
        .await?
        .into_iter()
        .filter_map(|collection| collection.short_name)
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

pub async fn resources(
    client: &Client,
    taxonomies: &Taxonomies,
) -> Result<Vec<Resource>, CatalogError> {
    let documents = find_projected(
        client,
        CARD_DB,
        RESOURCES,
        doc! {},
        doc! {
            "Name": "$name",
            "Status": "$status",
            "URL": "$url",
            "Notes": "$notes",
            "Organizations": "$organizations",
            "Category": "$category",
        },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| Resource {
            name: cell(record, "Name"),
            status: cell(record, "Status"),
            url: cell(record, "URL"),
            notes: cell(record, "Notes"),
            organizations: taxonomies.map_organizations(&string_list(record, "Organizations")),
            category: cell(record, "Category"),
            created: created_at(record),
        })
        .collect())
}

pub async fn card_users(
    client: &Client,
    taxonomies: &Taxonomies,
) -> Result<Vec<CardUser>, CatalogError> {
    let documents = find_projected(
        client,
        CARD_DB,
        USERS,
        doc! {},
        doc! {
            "Name": "$name",
            "Email": "$email",
            "Organization": "$organization",
            "Access": "$accessGroups",
        },
    )
    .await?;

    Ok(documents
        .iter()
        .map(|record| CardUser {
            name: cell(record, "Name"),
            email: cell(record, "Email"),
            organization: cell(record, "Organization")
                .map(|id| taxonomies.map_organization(&id)),
            access: string_list(record, "Access"),
            created_at: created_at(record),
        })
        .collect())
}

fn created_at(record: &Document) -> Option<chrono::DateTime<chrono::Utc>> {
    match record.get("_id") {
        Some(Bson::ObjectId(oid)) => convert::object_id_created_at(oid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;
    use crate::resolver::sample_taxonomies;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn learning_object_resolves_taxonomies_and_renames_collection() {
        let record = LearningObjectRecord {
            cuid: "ABC123".to_string(),
            object_collection: Some("nccp".to_string()),
            topics: vec!["5f0c9b1e2a3b4c5d6e7f8091".to_string()],
            tags: vec!["missing".to_string()],
            author: Author {
                username: Some("alice".to_string()),
                ..Author::default()
            },
            ..LearningObjectRecord::default()
        };

        let object = resolve_learning_object(record, &sample_taxonomies());
        assert_eq!(object.collection.as_deref(), Some("nccp"));
        assert_eq!(object.topics, vec!["Cryptography"]);
        assert_eq!(object.tags, vec!["Unknown Tag (missing)"]);
    }

    #[test]
    fn learning_object_without_topics_gets_placeholder() {
        let object = resolve_learning_object(LearningObjectRecord::default(), &sample_taxonomies());
        assert_eq!(object.topics, vec!["No Topic"]);
        assert!(object.tags.is_empty());
    }

    #[test]
    fn record_deserializes_from_catalog_document() {
        let document = doc! {
            "cuid": "ABC123",
            "objectCollection": "nccp",
            "version": 2,
            "author": { "username": "alice", "email": "a@example.com" },
            "contributors": [{ "name": "Bob" }],
            "topics": [],
        };
        let record: LearningObjectRecord = mongodb::bson::from_document(document).unwrap();
        assert_eq!(record.cuid, "ABC123");
        assert_eq!(record.object_collection.as_deref(), Some("nccp"));
        assert_eq!(record.version, Some(2));
        assert_eq!(record.author.username.as_deref(), Some("alice"));
        assert_eq!(record.contributors[0].name.as_deref(), Some("Bob"));
        assert!(record.tags.is_empty());
    }

    #[test]
    fn record_deserializes_with_nulls_and_loose_types() {
        let document = doc! {
            "cuid": Bson::Null,
            "name": Bson::Null,
            "version": 2.0,
            "author": Bson::Null,
            "contributors": Bson::Null,
            "topics": Bson::Null,
            "tags": ["60a1b2c3d4e5f60718293a4b", Bson::Null],
            "length": 3,
        };
        let record: LearningObjectRecord = mongodb::bson::from_document(document).unwrap();
        assert_eq!(record.cuid, "");
        assert_eq!(record.name, None);
        assert_eq!(record.version, Some(2));
        assert_eq!(record.author, Author::default());
        assert!(record.contributors.is_empty());
        assert!(record.topics.is_empty());
        assert_eq!(record.tags, vec!["60a1b2c3d4e5f60718293a4b"]);
        assert_eq!(record.length.as_deref(), Some("3"));

        let fractional: LearningObjectRecord =
            mongodb::bson::from_document(doc! { "cuid": "ABC123", "version": 2.5 }).unwrap();
        assert_eq!(fractional.version, None);

        let object = resolve_learning_object(record, &sample_taxonomies());
        assert_eq!(object.topics, vec!["No Topic"]);
        assert_eq!(object.tags, vec!["Lab"]);
    }

    #[test]
    fn detail_paths_need_author_and_cuid() {
        assert_eq!(
            detail_path(Some("alice"), "ABC123").as_deref(),
            Some("/details/alice/ABC123")
        );
        assert_eq!(detail_path(None, "ABC123"), None);
        assert_eq!(detail_path(Some("alice"), ""), None);
    }

    #[test]
    fn created_at_reads_object_id() {
        let oid = ObjectId::parse_str("5f0c9b1e2a3b4c5d6e7f8091").unwrap();
        let created = created_at(&doc! { "_id": oid }).unwrap();
        assert_eq!(created.timestamp(), 1_594_661_662);
        assert_eq!(created_at(&doc! { "_id": "plain" }), None);
    }
}
