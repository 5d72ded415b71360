//! Query execution against the named connections, with result caching

use crate::binder::{prepare, quote_identifier, Escape, Fields, IntoFields};
use crate::builder::schema::{create_table_sql, ColumnDef};
use crate::builder::{Query, SchemaBuilder};
use crate::cache::{fingerprint, table_prefix, Cache, MemoryCache};
use crate::compiler::{compile, inline_params};
use crate::condition::Condition;
use crate::connection::{Connections, DatabaseConfig};
use crate::driver::{Connect, Driver, Outcome, Row};
use crate::options::{selection_sql, Aggregate, Limit, OrderBy, QueryOptions, Selection};
use crate::{Error, Params, Result, ResultSet, Value};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

/// The connection a call runs on, resolved when the call starts
struct Active<D> {
    name: String,
    driver: Arc<D>,
}

/// Executes statements on one named connection, or on whichever connection
/// is the default when the handler is not bound to a name.
///
/// Clones share the connection registry, the cache and the memoised primary
/// keys.
pub struct Handler<D: Driver> {
    connections: Arc<Connections<D>>,
    connection: Option<String>,
    cache: Option<Arc<dyn Cache>>,
    default_ttl: Duration,
    primary_keys: Arc<Mutex<HashMap<String, Option<String>>>>,
    swaps: Arc<Mutex<HashMap<String, Arc<Handler<D>>>>>,
    /// Tables written inside the open transaction, for handlers passed to
    /// `transaction` work
    transaction: Option<Arc<std::sync::Mutex<BTreeSet<String>>>>,
}

impl<D: Driver> Clone for Handler<D> {
    fn clone(&self) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
            connection: self.connection.clone(),
            cache: self.cache.clone(),
            default_ttl: self.default_ttl,
            primary_keys: Arc::clone(&self.primary_keys),
            swaps: Arc::clone(&self.swaps),
            transaction: self.transaction.clone(),
        }
    }
}

impl<D: Driver> fmt::Debug for Handler<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("connection", &self.connection)
            .field("cached", &self.cache.is_some())
            .field("default_ttl", &self.default_ttl)
            .field("in_transaction", &self.transaction.is_some())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Handler<D> {
    /// A handler on the registry's default connection, without a cache
    pub fn new(connections: Arc<Connections<D>>) -> Self {
        Self {
            connections,
            connection: None,
            cache: None,
            default_ttl: Duration::ZERO,
            primary_keys: Arc::new(Mutex::new(HashMap::new())),
            swaps: Arc::new(Mutex::new(HashMap::new())),
            transaction: None,
        }
    }

    /// Cache select results in `cache`
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// TTL used by `Query::cached`
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn connections(&self) -> &Arc<Connections<D>> {
        &self.connections
    }

    /// Name of the connection this handler is bound to, if any
    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// Start a fluent query on `table`
    pub fn table(&self, table: &str) -> Query<D> {
        Query::new(self.clone(), table)
    }

    /// Start a table definition
    pub fn schema(&self, table: &str) -> SchemaBuilder<D> {
        SchemaBuilder::new(self.clone(), table)
    }

    /// A handler bound to the connection called `name`.
    ///
    /// The handler is created once per name and reused afterwards; it shares
    /// the registry and cache with this one.
    pub async fn swap(&self, name: &str) -> Result<Arc<Handler<D>>> {
        if !self.connections.contains(name).await {
            return Err(Error::invalid_connection(format!(
                "no connection named '{}'",
                name
            )));
        }

        let mut swaps = self.swaps.lock().await;
        if let Some(handler) = swaps.get(name) {
            return Ok(Arc::clone(handler));
        }
        tracing::info!(connection = %name, "swapping to connection");
        let handler = Arc::new(self.bound_to(name));
        swaps.insert(name.to_string(), Arc::clone(&handler));
        Ok(handler)
    }

    fn bound_to(&self, name: &str) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
            connection: Some(name.to_string()),
            cache: self.cache.clone(),
            default_ttl: self.default_ttl,
            primary_keys: Arc::clone(&self.primary_keys),
            swaps: Arc::new(Mutex::new(HashMap::new())),
            transaction: None,
        }
    }

    async fn active(&self) -> Result<Active<D>> {
        let name = match &self.connection {
            Some(name) => name.clone(),
            None => self
                .connections
                .default_name()
                .await
                .ok_or_else(|| Error::invalid_connection("no default connection"))?,
        };
        let driver = self.connections.get(Some(name.as_str())).await?;
        Ok(Active { name, driver })
    }

    async fn execute_on(&self, active: &Active<D>, sql: &str, params: &Params) -> Result<Outcome> {
        tracing::debug!(
            connection = %active.name,
            sql,
            params = params.len(),
            types = %params.type_string(),
            "execute"
        );
        active.driver.execute(sql, params).await
    }

    async fn fetch_on(&self, active: &Active<D>, sql: &str, params: &Params) -> Result<Vec<Row>> {
        tracing::debug!(
            connection = %active.name,
            sql,
            params = params.len(),
            types = %params.type_string(),
            "fetch"
        );
        active.driver.fetch_all(sql, params).await
    }

    fn invalidate(&self, active: &Active<D>, table: &str) {
        if let Some(touched) = &self.transaction {
            touched
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(table.to_string());
        }
        if let Some(cache) = &self.cache {
            let removed = cache.clear_prefix(&table_prefix(&active.name, table));
            tracing::debug!(connection = %active.name, table, removed, "invalidated cached results");
        }
    }

    /// Run a raw statement and return its rows
    pub async fn query(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        require_sql(sql)?;
        let active = self.active().await?;
        self.fetch_on(&active, sql, params).await
    }

    /// Run a raw statement that returns no rows
    pub async fn statement(&self, sql: &str, params: &Params) -> Result<Outcome> {
        require_sql(sql)?;
        let active = self.active().await?;
        self.execute_on(&active, sql, params).await
    }

    /// Select rows from `table`.
    ///
    /// Rows are keyed by primary key unless the query joins other tables.
    /// A non-zero `cache_ttl` serves repeated identical selects from the cache
    /// until the table is next modified.
    pub async fn select(
        &self,
        table: &str,
        conditions: &[Condition],
        options: &QueryOptions,
        fields: &[Selection],
        cache_ttl: Duration,
    ) -> Result<ResultSet> {
        require_name("table", table)?;
        let active = self.active().await?;
        let (sql, params) = select_sql(&*active.driver, table, conditions, options, fields)?;
        let shape = ("select", conditions, options, fields);
        self.fetch_cached(&active, table, &shape, &sql, &params, cache_ttl, !options.has_joins())
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_cached<S: Serialize>(
        &self,
        active: &Active<D>,
        table: &str,
        shape: &S,
        sql: &str,
        params: &Params,
        cache_ttl: Duration,
        keyed: bool,
    ) -> Result<ResultSet> {
        // uncommitted rows must never reach the shared cache
        let cache = self
            .cache
            .as_ref()
            .filter(|_| !cache_ttl.is_zero() && self.transaction.is_none());
        let key = match cache {
            Some(_) => Some(fingerprint(&active.name, table, shape)?),
            None => None,
        };

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(payload) = cache.get(key) {
                tracing::trace!(table, key = %key, "cache hit");
                return Ok(serde_json::from_str(&payload)?);
            }
            tracing::trace!(table, key = %key, "cache miss");
        }

        let rows = self.fetch_on(active, sql, params).await?;
        let result = match keyed {
            true => match self.primary_key_on(active, table).await? {
                Some(pk) => ResultSet::keyed_by(rows, &pk),
                None => ResultSet::indexed(rows),
            },
            false => ResultSet::indexed(rows),
        };

        if let (Some(cache), Some(key)) = (cache, key) {
            cache.set(&key, serde_json::to_string(&result)?, cache_ttl);
        }
        Ok(result)
    }

    /// Run an aggregate function over `column` (`*` when `None`).
    ///
    /// LIMIT and ORDER BY in `options` are ignored; the aggregate covers
    /// every matching row.
    pub async fn aggregate(
        &self,
        table: &str,
        function: Aggregate,
        column: Option<&str>,
        conditions: &[Condition],
        options: &QueryOptions,
        cache_ttl: Duration,
    ) -> Result<Value> {
        require_name("table", table)?;
        let fields = [Selection::Aggregate {
            function,
            column: column.map(str::to_string),
            alias: "aggregate".to_string(),
        }];
        let active = self.active().await?;
        let options = options.unbounded();
        let (sql, params) = select_sql(&*active.driver, table, conditions, &options, &fields)?;
        let shape = ("aggregate", conditions, &options, &fields);
        let result = self
            .fetch_cached(&active, table, &shape, &sql, &params, cache_ttl, false)
            .await?;
        Ok(first_value(&result))
    }

    pub async fn count(&self, table: &str, conditions: &[Condition], options: &QueryOptions) -> Result<u64> {
        let value = self
            .aggregate(table, Aggregate::Count, None, conditions, options, Duration::ZERO)
            .await?;
        Ok(as_count(&value))
    }

    pub async fn sum(&self, table: &str, column: &str, conditions: &[Condition]) -> Result<Value> {
        self.aggregate(table, Aggregate::Sum, Some(column), conditions, &QueryOptions::default(), Duration::ZERO)
            .await
    }

    pub async fn average(&self, table: &str, column: &str, conditions: &[Condition]) -> Result<Value> {
        self.aggregate(table, Aggregate::Avg, Some(column), conditions, &QueryOptions::default(), Duration::ZERO)
            .await
    }

    pub async fn min(&self, table: &str, column: &str, conditions: &[Condition]) -> Result<Value> {
        self.aggregate(table, Aggregate::Min, Some(column), conditions, &QueryOptions::default(), Duration::ZERO)
            .await
    }

    pub async fn max(&self, table: &str, column: &str, conditions: &[Condition]) -> Result<Value> {
        self.aggregate(table, Aggregate::Max, Some(column), conditions, &QueryOptions::default(), Duration::ZERO)
            .await
    }

    /// Count every row the query would return without its LIMIT.
    ///
    /// Plain selects are counted directly over the joined tables. Grouped or
    /// aggregated selects are counted through a derived table.
    pub async fn count_rows(
        &self,
        table: &str,
        conditions: &[Condition],
        options: &QueryOptions,
        fields: &[Selection],
        cache_ttl: Duration,
    ) -> Result<u64> {
        require_name("table", table)?;
        let active = self.active().await?;
        let unbounded = options.unbounded();
        let total = Selection::Aggregate {
            function: Aggregate::Count,
            column: None,
            alias: "total".to_string(),
        };
        let aggregated = fields.iter().any(|f| matches!(f, Selection::Aggregate { .. }));
        let (sql, params) = if unbounded.group_by.is_some() || aggregated {
            // one marker column per row, so joined tables sharing column
            // names cannot clash inside the derived table
            let inner_fields = match aggregated && unbounded.group_by.is_none() {
                true => fields.to_vec(),
                false => vec![Selection::Computed {
                    expression: "1".to_string(),
                    alias: "matched".to_string(),
                }],
            };
            let (inner, params) = select_sql(&*active.driver, table, conditions, &unbounded, &inner_fields)?;
            (
                format!("SELECT {} FROM ({}) AS `counted`", total.to_sql(&*active.driver), inner),
                params,
            )
        } else {
            select_sql(&*active.driver, table, conditions, &unbounded, &[total])?
        };
        let shape = ("count_rows", conditions, &unbounded, fields);
        let result = self
            .fetch_cached(&active, table, &shape, &sql, &params, cache_ttl, false)
            .await?;
        Ok(as_count(&first_value(&result)))
    }

    /// Whether any row matches, joins and grouping included
    pub async fn exists(&self, table: &str, conditions: &[Condition], options: &QueryOptions) -> Result<bool> {
        require_name("table", table)?;
        let active = self.active().await?;
        let options = QueryOptions {
            limit: Some(Limit { offset: 0, count: 1 }),
            order_by: Vec::new(),
            ..options.clone()
        };
        let fields = [Selection::Computed {
            expression: "1".to_string(),
            alias: "found".to_string(),
        }];
        let (sql, params) = select_sql(&*active.driver, table, conditions, &options, &fields)?;
        Ok(!self.fetch_on(&active, &sql, &params).await?.is_empty())
    }

    /// The value of `field` in the first matching row
    pub async fn get_field(
        &self,
        table: &str,
        field: &str,
        conditions: &[Condition],
        options: &QueryOptions,
    ) -> Result<Option<Value>> {
        require_name("table", table)?;
        require_name("field", field)?;
        let active = self.active().await?;
        let options = QueryOptions {
            limit: Some(Limit { offset: 0, count: 1 }),
            ..options.clone()
        };
        let fields = [Selection::from(field)];
        let (sql, params) = select_sql(&*active.driver, table, conditions, &options, &fields)?;
        let rows = self.fetch_on(&active, &sql, &params).await?;
        Ok(rows.first().and_then(Row::first).cloned())
    }

    /// Up to `count` random rows. The ordering and limit in `options` are
    /// replaced; its joins and grouping are kept.
    pub async fn random(
        &self,
        table: &str,
        count: u64,
        conditions: &[Condition],
        options: &QueryOptions,
        fields: &[Selection],
    ) -> Result<ResultSet> {
        let options = QueryOptions {
            order_by: vec![OrderBy::Random],
            limit: Some(Limit { offset: 0, count }),
            ..options.clone()
        };
        self.select(table, conditions, &options, fields, Duration::ZERO).await
    }

    /// Insert one row, returning the generated id
    pub async fn insert(&self, table: &str, values: impl IntoFields) -> Result<u64> {
        require_name("table", table)?;
        let active = self.active().await?;
        let prepared = prepare(&*active.driver, &values.into_fields())?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(&*active.driver, table),
            prepared.columns,
            prepared.placeholders
        );
        let outcome = self.execute_on(&active, &sql, &prepared.params).await?;
        self.invalidate(&active, table);
        Ok(outcome.last_insert_id)
    }

    /// Update matching rows, returning how many changed.
    ///
    /// With no conditions every row in the table is updated.
    pub async fn update(&self, table: &str, values: impl IntoFields, conditions: &[Condition]) -> Result<u64> {
        require_name("table", table)?;
        let active = self.active().await?;
        let prepared = prepare(&*active.driver, &values.into_fields())?;
        let compiled = compile(&*active.driver, conditions)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_identifier(&*active.driver, table),
            prepared.assignments,
            compiled.where_clause()
        );
        let mut params = prepared.params;
        params.extend(compiled.params);
        let outcome = self.execute_on(&active, &sql, &params).await?;
        self.invalidate(&active, table);
        Ok(outcome.rows_affected)
    }

    /// Delete matching rows, returning how many were removed.
    ///
    /// With no conditions every row in the table is deleted.
    pub async fn delete(&self, table: &str, conditions: &[Condition]) -> Result<u64> {
        require_name("table", table)?;
        let active = self.active().await?;
        let compiled = compile(&*active.driver, conditions)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_identifier(&*active.driver, table),
            compiled.where_clause()
        );
        let outcome = self.execute_on(&active, &sql, &compiled.params).await?;
        self.invalidate(&active, table);
        Ok(outcome.rows_affected)
    }

    async fn ddl(&self, active: &Active<D>, sql: &str, tables: &[&str]) -> Result<()> {
        self.execute_on(active, sql, &Params::new()).await?;
        let mut primary_keys = self.primary_keys.lock().await;
        for table in tables {
            primary_keys.remove(&pk_key(&active.name, table));
            self.invalidate(active, table);
        }
        Ok(())
    }

    pub async fn create(&self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        let active = self.active().await?;
        let sql = create_table_sql(&*active.driver, table, columns)?;
        self.ddl(&active, &sql, &[table]).await
    }

    /// Add columns to an existing table
    pub async fn add_field(&self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        require_name("table", table)?;
        if columns.is_empty() {
            return Err(Error::invalid_argument("at least one column is required"));
        }
        let active = self.active().await?;
        let escaper = &*active.driver;
        let mut clauses: Vec<String> = columns
            .iter()
            .map(|c| format!("ADD COLUMN {}", c.to_sql(escaper)))
            .collect();
        for column in columns.iter().filter(|c| c.key && c.column_type.is_key_eligible()) {
            let name = quote_identifier(escaper, &column.name);
            clauses.push(format!("ADD KEY {} ({})", name, name));
        }
        let sql = format!("ALTER TABLE {} {}", quote_identifier(escaper, table), clauses.join(", "));
        self.ddl(&active, &sql, &[table]).await
    }

    /// Redefine (and possibly rename) the column `field`
    pub async fn alter_field(&self, table: &str, field: &str, column: &ColumnDef) -> Result<()> {
        require_name("table", table)?;
        require_name("field", field)?;
        let active = self.active().await?;
        let sql = format!(
            "ALTER TABLE {} CHANGE {} {}",
            quote_identifier(&*active.driver, table),
            quote_identifier(&*active.driver, field),
            column.to_sql(&*active.driver)
        );
        self.ddl(&active, &sql, &[table]).await
    }

    pub async fn drop_field(&self, table: &str, field: &str) -> Result<()> {
        require_name("table", table)?;
        require_name("field", field)?;
        let active = self.active().await?;
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_identifier(&*active.driver, table),
            quote_identifier(&*active.driver, field)
        );
        self.ddl(&active, &sql, &[table]).await
    }

    pub async fn drop(&self, table: &str) -> Result<()> {
        require_name("table", table)?;
        let active = self.active().await?;
        let sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(&*active.driver, table));
        self.ddl(&active, &sql, &[table]).await
    }

    pub async fn drop_view(&self, view: &str) -> Result<()> {
        require_name("view", view)?;
        let active = self.active().await?;
        let sql = format!("DROP VIEW IF EXISTS {}", quote_identifier(&*active.driver, view));
        self.ddl(&active, &sql, &[view]).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        require_name("table", from)?;
        require_name("table", to)?;
        let active = self.active().await?;
        let sql = format!(
            "RENAME TABLE {} TO {}",
            quote_identifier(&*active.driver, from),
            quote_identifier(&*active.driver, to)
        );
        self.ddl(&active, &sql, &[from, to]).await
    }

    pub async fn truncate(&self, table: &str) -> Result<()> {
        require_name("table", table)?;
        let active = self.active().await?;
        let sql = format!("TRUNCATE TABLE {}", quote_identifier(&*active.driver, table));
        self.ddl(&active, &sql, &[table]).await
    }

    /// Create or replace a view over a select.
    ///
    /// Views cannot reference placeholders, so bound values are inlined as
    /// escaped literals.
    pub async fn create_view(
        &self,
        view: &str,
        table: &str,
        conditions: &[Condition],
        options: &QueryOptions,
        fields: &[Selection],
    ) -> Result<()> {
        require_name("view", view)?;
        require_name("table", table)?;
        let active = self.active().await?;
        let (select, params) = select_sql(&*active.driver, table, conditions, options, fields)?;
        let sql = format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            quote_identifier(&*active.driver, view),
            inline_params(&*active.driver, &select, &params)?
        );
        self.ddl(&active, &sql, &[view]).await
    }

    /// The primary-key column of `table`, looked up once per connection
    pub async fn primary_key(&self, table: &str) -> Result<Option<String>> {
        require_name("table", table)?;
        let active = self.active().await?;
        self.primary_key_on(&active, table).await
    }

    /// Like `primary_key`, failing with `InvalidSchema` when there is none
    pub async fn require_primary_key(&self, table: &str) -> Result<String> {
        self.primary_key(table)
            .await?
            .ok_or_else(|| Error::invalid_schema(format!("table '{}' has no primary key", table)))
    }

    async fn primary_key_on(&self, active: &Active<D>, table: &str) -> Result<Option<String>> {
        let key = pk_key(&active.name, table);
        if let Some(pk) = self.primary_keys.lock().await.get(&key) {
            return Ok(pk.clone());
        }

        let sql = format!(
            "SHOW KEYS FROM {} WHERE Key_name = 'PRIMARY'",
            quote_identifier(&*active.driver, table)
        );
        let rows = self.fetch_on(active, &sql, &Params::new()).await?;
        let pk = rows
            .first()
            .and_then(|row| row.get("Column_name"))
            .map(Value::to_string);
        self.primary_keys.lock().await.insert(key, pk.clone());
        Ok(pk)
    }

    /// Names of the base tables in the connection's database
    pub async fn tables(&self) -> Result<Vec<String>> {
        let active = self.active().await?;
        let rows = self
            .fetch_on(&active, "SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'", &Params::new())
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().map(Value::to_string))
            .collect())
    }

    /// Run `work` in a transaction.
    ///
    /// Autocommit is off while `work` runs. An error or `false` from `work`
    /// rolls back and yields `Ok(false)`; otherwise the transaction commits
    /// and yields `Ok(true)`. Autocommit is turned back on in every case,
    /// including when the returned future is dropped before it completes.
    /// Statements from other handlers on the same connection during `work`
    /// join the transaction.
    ///
    /// The handler given to `work` reads past the cache, and cached results
    /// for every table it writes are cleared once the transaction ends.
    pub async fn transaction<F, Fut>(&self, work: F) -> Result<bool>
    where
        F: FnOnce(Handler<D>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let active = self.active().await?;
        let none = Params::new();
        self.execute_on(&active, "SET autocommit = 0", &none).await?;
        let touched = Arc::new(std::sync::Mutex::new(BTreeSet::new()));
        let guard = TransactionGuard {
            connection: active.name.clone(),
            driver: Some(Arc::clone(&active.driver)),
            cache: self.cache.clone(),
            touched: Arc::clone(&touched),
        };
        let scoped = Self {
            transaction: Some(Arc::clone(&touched)),
            ..self.bound_to(&active.name)
        };

        let result = match work(scoped).await {
            Ok(true) => self.execute_on(&active, "COMMIT", &none).await.map(|_| true),
            Ok(false) => {
                tracing::warn!(connection = %active.name, "transaction declined, rolling back");
                self.execute_on(&active, "ROLLBACK", &none).await.map(|_| false)
            }
            Err(e) => {
                tracing::warn!(connection = %active.name, error = %e, "transaction failed, rolling back");
                self.execute_on(&active, "ROLLBACK", &none).await.map(|_| false)
            }
        };

        let restored = self.execute_on(&active, "SET autocommit = 1", &none).await;
        guard.disarm();
        for table in take_touched(&touched) {
            self.invalidate(&active, &table);
        }

        let committed = result?;
        restored?;
        Ok(committed)
    }

    /// Copy every base table, structure and rows, into the database behind
    /// connection `target`. Any failure is reported as `UnknownDuplication`.
    pub async fn duplicate_database(&self, target: &str) -> Result<()> {
        self.copy_tables(target).await.map_err(Error::duplication)
    }

    async fn copy_tables(&self, target: &str) -> Result<()> {
        let destination = self.swap(target).await?;
        let none = Params::new();
        destination.statement("SET FOREIGN_KEY_CHECKS = 0", &none).await?;
        let copied = self.copy_each_table(&destination, target).await;
        let restored = destination.statement("SET FOREIGN_KEY_CHECKS = 1", &none).await;
        copied?;
        restored?;
        Ok(())
    }

    async fn copy_each_table(&self, destination: &Handler<D>, target: &str) -> Result<()> {
        let none = Params::new();
        for table in self.tables().await? {
            let active = self.active().await?;
            let quoted = quote_identifier(&*active.driver, &table);
            let definition = self
                .fetch_on(&active, &format!("SHOW CREATE TABLE {}", quoted), &none)
                .await?;
            let create = definition
                .first()
                .and_then(|row| row.get("Create Table"))
                .map(Value::to_string)
                .ok_or_else(|| Error::invalid_schema(format!("no definition returned for '{}'", table)))?;

            destination
                .statement(&format!("DROP TABLE IF EXISTS {}", quoted), &none)
                .await?;
            destination.statement(&create, &none).await?;

            let rows = self
                .fetch_on(&active, &format!("SELECT * FROM {}", quoted), &none)
                .await?;
            tracing::debug!(table = %table, rows = rows.len(), destination = %target, "copying table");
            for row in rows {
                let fields: Fields = row.columns().cloned().collect();
                destination.insert(&table, fields).await?;
            }
        }
        Ok(())
    }
}

/// Rolls back and turns autocommit back on when a transaction is abandoned
/// before it finishes, such as when its future is dropped or its work panics.
struct TransactionGuard<D: Driver> {
    connection: String,
    driver: Option<Arc<D>>,
    cache: Option<Arc<dyn Cache>>,
    touched: Arc<std::sync::Mutex<BTreeSet<String>>>,
}

impl<D: Driver> TransactionGuard<D> {
    fn disarm(mut self) {
        self.driver = None;
    }
}

impl<D: Driver> Drop for TransactionGuard<D> {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        let connection = std::mem::take(&mut self.connection);
        tracing::warn!(connection = %connection, "transaction abandoned, rolling back");
        if let Some(cache) = &self.cache {
            for table in take_touched(&self.touched) {
                cache.clear_prefix(&table_prefix(&connection, &table));
            }
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(connection = %connection, "no runtime to roll back abandoned transaction");
            return;
        };
        runtime.spawn(async move {
            let none = Params::new();
            for sql in ["ROLLBACK", "SET autocommit = 1"] {
                if let Err(e) = driver.execute(sql, &none).await {
                    tracing::error!(connection = %connection, sql, error = %e, "cleanup after abandoned transaction failed");
                }
            }
        });
    }
}

impl<D: Connect> Handler<D> {
    /// Open every configured connection, with a memory cache when enabled
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let connections = Connections::from_config(config).await?;
        let mut handler = Self::new(Arc::new(connections));
        if config.cache.enabled {
            handler = handler
                .with_cache(Arc::new(MemoryCache::new()))
                .with_default_ttl(Duration::from_secs(config.cache.default_ttl_secs));
        }
        Ok(handler)
    }
}

/// Build `SELECT fields FROM table [JOIN ..] WHERE .. [GROUP BY ..] [ORDER BY ..] [LIMIT ..]`
pub(crate) fn select_sql<E: Escape + ?Sized>(
    escaper: &E,
    table: &str,
    conditions: &[Condition],
    options: &QueryOptions,
    fields: &[Selection],
) -> Result<(String, Params)> {
    let compiled = compile(escaper, conditions)?;
    let sql = format!(
        "SELECT {} FROM {}{} WHERE {}{}",
        selection_sql(escaper, fields),
        quote_identifier(escaper, table),
        options.join_sql(escaper, table),
        compiled.where_clause(),
        options.tail_sql(escaper)
    );
    Ok((sql, compiled.params))
}

fn take_touched(touched: &std::sync::Mutex<BTreeSet<String>>) -> BTreeSet<String> {
    std::mem::take(&mut *touched.lock().unwrap_or_else(PoisonError::into_inner))
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_argument(format!("{} name is required", kind)));
    }
    Ok(())
}

fn require_sql(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(Error::invalid_argument("query string is required"));
    }
    Ok(())
}

fn pk_key(connection: &str, table: &str) -> String {
    format!("{}/{}", connection, table)
}

fn first_value(result: &ResultSet) -> Value {
    result
        .first()
        .and_then(Row::first)
        .cloned()
        .unwrap_or(Value::Null)
}

fn as_count(value: &Value) -> u64 {
    value.as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}
