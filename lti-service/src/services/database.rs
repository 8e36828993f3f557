use async_trait::async_trait;
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

use super::store::LtiStore;
use crate::models::{LineItem, LtiContentItem, TempUser, Tool};

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for lti-service");

        let unique = |name: &str| {
            IndexOptions::builder()
                .name(name.to_string())
                .unique(true)
                .build()
        };

        self.tools()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "client_id": 1 })
                    .options(unique("client_id_unique"))
                    .build(),
                None,
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to create client_id index on tools collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created unique index on tools.client_id");

        self.content_items()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "uuid": 1 })
                    .options(unique("uuid_unique"))
                    .build(),
                None,
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create uuid index on lti_content_items collection: {}",
                    e
                );
                AppError::from(e)
            })?;
        tracing::info!("Created unique index on lti_content_items.uuid");

        self.line_items()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "resource_link_id": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("resource_link_lookup".to_string())
                            .build(),
                    )
                    .build(),
                None,
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create resource_link_id index on line_items collection: {}",
                    e
                );
                AppError::from(e)
            })?;
        tracing::info!("Created index on line_items.resource_link_id");

        Ok(())
    }

    pub fn tools(&self) -> Collection<Tool> {
        self.db.collection("tools")
    }

    pub fn users(&self) -> Collection<TempUser> {
        self.db.collection("temp_users")
    }

    pub fn content_items(&self) -> Collection<LtiContentItem> {
        self.db.collection("lti_content_items")
    }

    pub fn line_items(&self) -> Collection<LineItem> {
        self.db.collection("line_items")
    }
}

#[async_trait]
impl LtiStore for MongoStore {
    async fn find_tool_by_client_id(&self, client_id: &str) -> Result<Option<Tool>, anyhow::Error> {
        self.tools()
            .find_one(doc! { "client_id": client_id }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load tool {}: {}", client_id, e))
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<TempUser>, anyhow::Error> {
        self.users()
            .find_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load user {}: {}", user_id, e))
    }

    async fn find_content_item(&self, uuid: &str) -> Result<Option<LtiContentItem>, anyhow::Error> {
        self.content_items()
            .find_one(doc! { "uuid": uuid }, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load content item {}: {}", uuid, e))
    }

    async fn find_line_item_by_resource_link_id(
        &self,
        resource_link_id: &str,
    ) -> Result<Option<LineItem>, anyhow::Error> {
        self.line_items()
            .find_one(doc! { "resource_link_id": resource_link_id }, None)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to load line item for resource link {}: {}",
                    resource_link_id,
                    e
                )
            })
    }

    async fn insert_content_items(&self, items: &[LtiContentItem]) -> Result<(), anyhow::Error> {
        if items.is_empty() {
            return Ok(());
        }

        self.content_items()
            .insert_many(items, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to persist content items: {}", e))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| anyhow::anyhow!("MongoDB health check failed: {}", e))?;
        Ok(())
    }
}
