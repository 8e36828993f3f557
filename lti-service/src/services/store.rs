use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::models::{LineItem, LtiContentItem, TempUser, Tool};

/// Document store holding tool registrations, users, content items and line
/// items. Only content items are written by this service.
#[async_trait]
pub trait LtiStore: Send + Sync {
    async fn find_tool_by_client_id(&self, client_id: &str) -> Result<Option<Tool>, anyhow::Error>;
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<TempUser>, anyhow::Error>;
    async fn find_content_item(&self, uuid: &str) -> Result<Option<LtiContentItem>, anyhow::Error>;
    async fn find_line_item_by_resource_link_id(
        &self,
        resource_link_id: &str,
    ) -> Result<Option<LineItem>, anyhow::Error>;
    async fn insert_content_items(&self, items: &[LtiContentItem]) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Process-local store for tests and offline runs.
pub struct InMemoryStore {
    tools: RwLock<HashMap<String, Tool>>,
    users: RwLock<HashMap<String, TempUser>>,
    content_items: RwLock<HashMap<String, LtiContentItem>>,
    line_items: RwLock<HashMap<String, LineItem>>,
    reject_writes: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("In-memory store lock poisoned: {}", e)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            content_items: RwLock::new(HashMap::new()),
            line_items: RwLock::new(HashMap::new()),
            reject_writes: AtomicBool::new(false),
        }
    }

    pub fn insert_tool(&self, tool: Tool) -> Result<(), anyhow::Error> {
        self.tools
            .write()
            .map_err(poisoned)?
            .insert(tool.client_id.clone(), tool);
        Ok(())
    }

    pub fn insert_user(&self, user: TempUser) -> Result<(), anyhow::Error> {
        self.users
            .write()
            .map_err(poisoned)?
            .insert(user.user_id.clone(), user);
        Ok(())
    }

    pub fn insert_line_item(&self, line_item: LineItem) -> Result<(), anyhow::Error> {
        self.line_items
            .write()
            .map_err(poisoned)?
            .insert(line_item.resource_link_id.clone(), line_item);
        Ok(())
    }

    pub fn content_items(&self) -> Result<Vec<LtiContentItem>, anyhow::Error> {
        Ok(self
            .content_items
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect())
    }

    /// Makes every subsequent write fail, simulating an unavailable store.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl LtiStore for InMemoryStore {
    async fn find_tool_by_client_id(&self, client_id: &str) -> Result<Option<Tool>, anyhow::Error> {
        Ok(self.tools.read().map_err(poisoned)?.get(client_id).cloned())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<TempUser>, anyhow::Error> {
        Ok(self.users.read().map_err(poisoned)?.get(user_id).cloned())
    }

    async fn find_content_item(&self, uuid: &str) -> Result<Option<LtiContentItem>, anyhow::Error> {
        Ok(self.content_items.read().map_err(poisoned)?.get(uuid).cloned())
    }

    async fn find_line_item_by_resource_link_id(
        &self,
        resource_link_id: &str,
    ) -> Result<Option<LineItem>, anyhow::Error> {
        Ok(self
            .line_items
            .read()
            .map_err(poisoned)?
            .get(resource_link_id)
            .cloned())
    }

    async fn insert_content_items(&self, items: &[LtiContentItem]) -> Result<(), anyhow::Error> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("In-memory store is rejecting writes"));
        }

        let mut guard = self.content_items.write().map_err(poisoned)?;
        for item in items {
            guard.insert(item.uuid.clone(), item.clone());
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
