//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use credit_ledger_core::{
    Agent, AgentId, ExtraCreditPurchase, Plan, PlanId, SmartRechargeSetting, Subscription,
    UsageRecord, Workspace, WorkspaceId,
};

use crate::charge::{settle, ChargeDraft, ChargeOutcome, TimeRange};
use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    charge_locks: Mutex<HashMap<WorkspaceId, Arc<Mutex<()>>>>,
    purchase_lock: Mutex<()>,
}

fn poisoned() -> StoreError {
    StoreError::Database("store lock poisoned".into())
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            charge_locks: Mutex::new(HashMap::new()),
            purchase_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        self.get_raw(cf_name, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Scan a workspace's ledger rows in key (creation) order.
    ///
    /// With a range, the scan seeks to the range start and stops at the
    /// first key whose ULID millisecond is past the range end.
    fn scan_ledger<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        workspace_id: &WorkspaceId,
        range: Option<TimeRange>,
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let prefix = keys::ledger_prefix(workspace_id);
        let start = range.map_or_else(
            || prefix.clone(),
            |r| keys::ledger_seek_key(workspace_id, r.from),
        );
        let until_ms = range.map(|r| u64::try_from(r.until.timestamp_millis()).unwrap_or(0));

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(until_ms) = until_ms {
                if keys::ledger_key_timestamp_ms(&key)? > until_ms {
                    break;
                }
            }

            rows.push(Self::deserialize(&value)?);
        }

        Ok(rows)
    }

    fn charge_lock(&self, workspace_id: &WorkspaceId) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.charge_locks.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(locks.entry(*workspace_id).or_default()))
    }

    /// Drop a workspace's charge lock once no other charge holds or awaits it.
    ///
    /// Handles are only cloned under the map lock, so a count of two (the
    /// map's and `lock`) means nobody else can reach the entry.
    fn release_charge_lock(&self, workspace_id: &WorkspaceId, lock: Arc<Mutex<()>>) -> Result<()> {
        let mut locks = self.charge_locks.lock().map_err(|_| poisoned())?;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(workspace_id);
        }
        Ok(())
    }

    /// Read, settle and write one charge. Callers hold the workspace's charge lock.
    fn settle_and_write(&self, draft: &ChargeDraft) -> Result<ChargeOutcome> {
        let workspace_id = draft.context.workspace_id;
        let balance = self.credit_balance(&workspace_id, Some((draft.allowance, draft.period)))?;
        let outcome = settle(draft, balance)?;

        // Write atomically
        let mut batch = WriteBatch::default();
        self.stage_usage(&mut batch, &outcome.records)?;
        self.write(batch)?;
        Ok(outcome)
    }

    /// Queue a purchase and its dedup index entry on `batch`.
    fn stage_purchase(&self, batch: &mut WriteBatch, purchase: &ExtraCreditPurchase) -> Result<()> {
        let cf_purchases = self.cf(cf::PURCHASES)?;
        let key = keys::ledger_key(&purchase.workspace_id, purchase.id.to_bytes());
        batch.put_cf(&cf_purchases, &key, Self::serialize(purchase)?);

        if let Some(dedup_key) = purchase.dedup_key() {
            let cf_dedup = self.cf(cf::PURCHASES_BY_DEDUP_KEY)?;
            batch.put_cf(&cf_dedup, keys::reference_key(&dedup_key), &key);
        }
        Ok(())
    }

    /// Queue usage records on `batch`.
    fn stage_usage(&self, batch: &mut WriteBatch, records: &[UsageRecord]) -> Result<()> {
        let cf_usage = self.cf(cf::USAGE_RECORDS)?;
        for record in records {
            let key = keys::ledger_key(&record.workspace_id, record.id.to_bytes());
            batch.put_cf(&cf_usage, key, Self::serialize(record)?);
        }
        Ok(())
    }

    /// Queue a secondary index update, dropping the entry for `old` if it changed.
    fn stage_index(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        old: Option<&str>,
        new: Option<&str>,
        target: &[u8],
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        if let Some(old) = old.filter(|old| Some(*old) != new) {
            batch.delete_cf(&cf, keys::reference_key(old));
        }
        if let Some(new) = new {
            batch.put_cf(&cf, keys::reference_key(new), target);
        }
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Workspace Operations
    // =========================================================================

    fn put_workspace(&self, workspace: &Workspace) -> Result<()> {
        let key = keys::workspace_key(&workspace.id);
        let old: Option<Workspace> = self.get_value(cf::WORKSPACES, &key)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(cf::WORKSPACES)?, &key, Self::serialize(workspace)?);
        self.stage_index(
            &mut batch,
            cf::WORKSPACES_BY_CUSTOMER,
            old.as_ref().and_then(|w| w.stripe_customer_id.as_deref()),
            workspace.stripe_customer_id.as_deref(),
            &key,
        )?;
        self.write(batch)
    }

    fn get_workspace(&self, workspace_id: &WorkspaceId) -> Result<Option<Workspace>> {
        self.get_value(cf::WORKSPACES, &keys::workspace_key(workspace_id))
    }

    fn find_workspace_by_customer(&self, customer_id: &str) -> Result<Option<Workspace>> {
        match self.get_raw(cf::WORKSPACES_BY_CUSTOMER, &keys::reference_key(customer_id))? {
            Some(bytes) => self.get_workspace(&keys::decode_workspace_id(&bytes)?),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    fn put_agent(&self, agent: &Agent) -> Result<()> {
        self.put_value(cf::AGENTS, &keys::agent_key(&agent.id), agent)
    }

    fn get_agent(&self, agent_id: &AgentId) -> Result<Option<Agent>> {
        self.get_value(cf::AGENTS, &keys::agent_key(agent_id))
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    fn put_plan(&self, plan: &Plan) -> Result<()> {
        let key = keys::plan_key(&plan.id);
        let old: Option<Plan> = self.get_value(cf::PLANS, &key)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&self.cf(cf::PLANS)?, &key, Self::serialize(plan)?);
        self.stage_index(
            &mut batch,
            cf::PLANS_BY_PRICE,
            old.as_ref().and_then(|p| p.stripe_price_id.as_deref()),
            plan.stripe_price_id.as_deref(),
            &key,
        )?;
        self.write(batch)
    }

    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>> {
        self.get_value(cf::PLANS, &keys::plan_key(plan_id))
    }

    fn find_plan_by_price_id(&self, price_id: &str) -> Result<Option<Plan>> {
        match self.get_raw(cf::PLANS_BY_PRICE, &keys::reference_key(price_id))? {
            Some(bytes) => self.get_plan(&keys::decode_plan_id(&bytes)?),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn put_subscription(&self, subscription: &Subscription) -> Result<()> {
        let key = keys::workspace_key(&subscription.workspace_id);
        let old: Option<Subscription> = self.get_value(cf::SUBSCRIPTIONS, &key)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &self.cf(cf::SUBSCRIPTIONS)?,
            &key,
            Self::serialize(subscription)?,
        );
        self.stage_index(
            &mut batch,
            cf::SUBSCRIPTIONS_BY_STRIPE_ID,
            old.as_ref().and_then(|s| s.stripe_subscription_id.as_deref()),
            subscription.stripe_subscription_id.as_deref(),
            &key,
        )?;
        self.write(batch)
    }

    fn get_subscription(&self, workspace_id: &WorkspaceId) -> Result<Option<Subscription>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::workspace_key(workspace_id))
    }

    fn find_subscription_by_stripe_id(&self, stripe_id: &str) -> Result<Option<Subscription>> {
        match self.get_raw(cf::SUBSCRIPTIONS_BY_STRIPE_ID, &keys::reference_key(stripe_id))? {
            Some(bytes) => self.get_subscription(&keys::decode_workspace_id(&bytes)?),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    fn append_usage_records(&self, records: &[UsageRecord]) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_usage(&mut batch, records)?;
        self.write(batch)
    }

    fn list_usage(
        &self,
        workspace_id: &WorkspaceId,
        range: Option<TimeRange>,
    ) -> Result<Vec<UsageRecord>> {
        let records: Vec<UsageRecord> = self.scan_ledger(cf::USAGE_RECORDS, workspace_id, range)?;
        Ok(match range {
            Some(range) => records
                .into_iter()
                .filter(|r| range.contains(r.created_at))
                .collect(),
            None => records,
        })
    }

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    fn put_purchase(&self, purchase: &ExtraCreditPurchase) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_purchase(&mut batch, purchase)?;
        self.write(batch)
    }

    fn insert_purchase_if_absent(&self, purchase: &ExtraCreditPurchase) -> Result<bool> {
        let _guard = self.purchase_lock.lock().map_err(|_| poisoned())?;

        if let Some(dedup_key) = purchase.dedup_key() {
            if self
                .get_raw(cf::PURCHASES_BY_DEDUP_KEY, &keys::reference_key(&dedup_key))?
                .is_some()
            {
                return Ok(false);
            }
        }

        self.put_purchase(purchase)?;
        Ok(true)
    }

    fn list_purchases(&self, workspace_id: &WorkspaceId) -> Result<Vec<ExtraCreditPurchase>> {
        self.scan_ledger(cf::PURCHASES, workspace_id, None)
    }

    // =========================================================================
    // Smart Recharge Settings
    // =========================================================================

    fn put_recharge_setting(&self, setting: &SmartRechargeSetting) -> Result<()> {
        self.put_value(
            cf::RECHARGE_SETTINGS,
            &keys::workspace_key(&setting.workspace_id),
            setting,
        )
    }

    fn get_recharge_setting(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SmartRechargeSetting>> {
        self.get_value(cf::RECHARGE_SETTINGS, &keys::workspace_key(workspace_id))
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn record_charge(&self, draft: &ChargeDraft) -> Result<ChargeOutcome> {
        let workspace_id = draft.context.workspace_id;
        let lock = self.charge_lock(&workspace_id)?;
        let settled = match lock.lock() {
            Ok(_guard) => self.settle_and_write(draft),
            Err(_) => Err(poisoned()),
        };
        self.release_charge_lock(&workspace_id, lock)?;
        let outcome = settled?;

        tracing::debug!(
            workspace_id = %workspace_id,
            correlation_id = %outcome.correlation_id,
            plan = outcome.split.plan,
            extra = outcome.split.extra,
            "charge recorded"
        );

        Ok(outcome)
    }
}
