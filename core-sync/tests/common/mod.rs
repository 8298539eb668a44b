//! In-memory DAM service with call counters and fault injection

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{AssetRef, BridgeError, DamClient, NewAsset, RemoteCollection, StorageSettings};
use core_runtime::IngestConfig;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    Rejected,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: FaultKind,
    /// `None` fails forever
    remaining: Option<u32>,
}

impl Fault {
    fn fire(&mut self, operation: &str) -> Option<BridgeError> {
        match &mut self.remaining {
            Some(0) => return None,
            Some(n) => *n -= 1,
            None => {}
        }
        Some(match self.kind {
            FaultKind::Transient => BridgeError::transient(operation, "503 service unavailable"),
            FaultKind::Rejected => BridgeError::rejected(400, format!("{} rejected", operation)),
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub settings: u32,
    pub collection_lookups: u32,
    pub collection_creates: u32,
    pub checksum_lookups: u32,
    pub external_id_lookups: u32,
    pub asset_creates: u32,
    pub links: u32,
}

impl Calls {
    pub fn remote_total(&self) -> u32 {
        self.collection_lookups
            + self.collection_creates
            + self.checksum_lookups
            + self.external_id_lookups
            + self.asset_creates
            + self.links
    }
}

#[derive(Default)]
struct State {
    settings: StorageSettings,
    settings_unavailable: bool,
    collections: Vec<RemoteCollection>,
    assets: Vec<AssetRef>,
    registrations: Vec<NewAsset>,
    links: Vec<(String, String)>,
    created_names: Vec<String>,
    calls: Calls,
    next_id: u64,
    collection_faults: HashMap<String, Fault>,
    asset_create_fault: Option<Fault>,
    link_fault: Option<Fault>,
    create_delay: Duration,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

#[derive(Default)]
pub struct FakeDam {
    state: AsyncMutex<State>,
}

impl FakeDam {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_settings(settings: StorageSettings) -> Arc<Self> {
        let dam = Self::default();
        dam.state.try_lock().expect("fresh fake").settings = settings;
        Arc::new(dam)
    }

    pub async fn calls(&self) -> Calls {
        self.state.lock().await.calls
    }

    pub async fn reset_calls(&self) {
        self.state.lock().await.calls = Calls::default();
    }

    /// Names passed to `collection_create`, in call order
    pub async fn created_names(&self) -> Vec<String> {
        self.state.lock().await.created_names.clone()
    }

    pub async fn collections(&self) -> Vec<RemoteCollection> {
        self.state.lock().await.collections.clone()
    }

    pub async fn collection_named(&self, name: &str) -> Option<RemoteCollection> {
        self.state
            .lock()
            .await
            .collections
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub async fn registrations(&self) -> Vec<NewAsset> {
        self.state.lock().await.registrations.clone()
    }

    pub async fn links(&self) -> Vec<(String, String)> {
        self.state.lock().await.links.clone()
    }

    pub async fn seed_collection(&self, parent_id: Option<&str>, name: &str) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id("col");
        state.collections.push(RemoteCollection {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        });
        id
    }

    pub async fn seed_asset(&self, asset: AssetRef) {
        self.state.lock().await.assets.push(asset);
    }

    pub async fn set_settings_unavailable(&self, unavailable: bool) {
        self.state.lock().await.settings_unavailable = unavailable;
    }

    pub async fn fail_collection_create(&self, name: &str, kind: FaultKind, times: Option<u32>) {
        self.state.lock().await.collection_faults.insert(
            name.to_string(),
            Fault {
                kind,
                remaining: times,
            },
        );
    }

    pub async fn fail_asset_create(&self, kind: FaultKind, times: Option<u32>) {
        self.state.lock().await.asset_create_fault = Some(Fault {
            kind,
            remaining: times,
        });
    }

    pub async fn fail_links(&self, kind: FaultKind, times: Option<u32>) {
        self.state.lock().await.link_fault = Some(Fault {
            kind,
            remaining: times,
        });
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.collection_faults.clear();
        state.asset_create_fault = None;
        state.link_fault = None;
    }

    pub async fn set_create_delay(&self, delay: Duration) {
        self.state.lock().await.create_delay = delay;
    }
}

#[async_trait]
impl DamClient for FakeDam {
    async fn storage_settings(&self, _storage_id: &str) -> BridgeResult<StorageSettings> {
        let mut state = self.state.lock().await;
        state.calls.settings += 1;
        if state.settings_unavailable {
            return Err(BridgeError::rejected(404, "storage not found"));
        }
        Ok(state.settings.clone())
    }

    /// Case-insensitive, like most DAM services
    async fn collection_lookup(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> BridgeResult<Option<RemoteCollection>> {
        let mut state = self.state.lock().await;
        state.calls.collection_lookups += 1;
        Ok(state
            .collections
            .iter()
            .find(|c| {
                c.parent_id.as_deref() == parent_id && c.name.to_lowercase() == name.to_lowercase()
            })
            .cloned())
    }

    async fn collection_create(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> BridgeResult<RemoteCollection> {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.collection_creates += 1;
            state.created_names.push(name.to_string());
            if let Some(error) = state
                .collection_faults
                .get_mut(name)
                .and_then(|f| f.fire("collections-create"))
            {
                return Err(error);
            }
            state.create_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        let collection = RemoteCollection {
            id: state.next_id("col"),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        };
        state.collections.push(collection.clone());
        Ok(collection)
    }

    async fn asset_lookup_by_checksum(
        &self,
        checksum: &str,
        _storage_id: &str,
    ) -> BridgeResult<Option<AssetRef>> {
        let mut state = self.state.lock().await;
        state.calls.checksum_lookups += 1;
        Ok(state
            .assets
            .iter()
            .find(|a| a.checksum.as_deref() == Some(checksum))
            .cloned())
    }

    async fn asset_lookup_by_external_id(
        &self,
        external_id: &str,
    ) -> BridgeResult<Option<AssetRef>> {
        let mut state = self.state.lock().await;
        state.calls.external_id_lookups += 1;
        Ok(state
            .assets
            .iter()
            .find(|a| a.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn asset_create(&self, storage_id: &str, asset: &NewAsset) -> BridgeResult<AssetRef> {
        let mut state = self.state.lock().await;
        state.calls.asset_creates += 1;
        if let Some(error) = state
            .asset_create_fault
            .as_mut()
            .and_then(|f| f.fire("assets-create"))
        {
            return Err(error);
        }

        let created = AssetRef {
            remote_id: state.next_id("asset"),
            checksum: Some(asset.checksum.clone()),
            external_id: Some(asset.external_id.clone()),
            storage_id: Some(storage_id.to_string()),
            deleted: false,
        };
        state.assets.push(created.clone());
        state.registrations.push(asset.clone());
        Ok(created)
    }

    async fn asset_link_to_collection(
        &self,
        asset_id: &str,
        collection_id: &str,
    ) -> BridgeResult<()> {
        let mut state = self.state.lock().await;
        state.calls.links += 1;
        if let Some(error) = state.link_fault.as_mut().and_then(|f| f.fire("assets-link")) {
            return Err(error);
        }
        state
            .links
            .push((asset_id.to_string(), collection_id.to_string()));
        Ok(())
    }
}

/// Config rooted at `root` with instant retries
pub fn test_config(root: &Path) -> IngestConfig {
    IngestConfig::builder()
        .storage_id("fs-1")
        .root_path(root.to_string_lossy())
        .backoff_base_seconds(0.0)
        .max_backoff_seconds(0.0)
        .call_timeout_seconds(2.0)
        .build()
        .expect("valid test config")
}

pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, content).expect("write fixture");
}
