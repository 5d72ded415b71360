//! Fluent query builder bound to a handler

use super::filter::Filter;
use crate::binder::{Fields, IntoFields};
use crate::condition::Condition;
use crate::driver::{Driver, Row};
use crate::handler::Handler;
use crate::options::{
    Aggregate, IntoSelections, Join, JoinType, Limit, OrderBy, QueryOptions, Selection, SortDirection,
};
use crate::pagination::{Page, PageSlot, Paginator};
use crate::{Error, Result, ResultSet, Value};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Accumulates conditions, options and row data for one table, then runs a
/// single terminal operation.
///
/// Terminal methods consume the query, so a query runs at most once.
///
/// ```no_run
/// # use quarry_core::{Filter, Handler, op};
/// # async fn demo<D: quarry_core::Driver>(db: Handler<D>) -> quarry_core::Result<()> {
/// let adults = db
///     .table("users")
///     .where_(("age", op::GTE, 18))
///     .where_group(|g| g.where_(("role", "admin")).or_where(("role", "owner")))
///     .order_by_desc("created_at")
///     .fetch(20)
///     .select()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Query<D: Driver> {
    handler: Handler<D>,
    table: String,
    conditions: Vec<Condition>,
    options: QueryOptions,
    fields: Vec<Selection>,
    data: Fields,
    cache_ttl: Duration,
    page: Option<PageSlot>,
    error: Option<Error>,
}

impl<D: Driver> Filter for Query<D> {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn defer_error(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }
}

impl<D: Driver> Query<D> {
    pub fn new(handler: Handler<D>, table: impl Into<String>) -> Self {
        Self {
            handler,
            table: table.into(),
            conditions: Vec::new(),
            options: QueryOptions::default(),
            fields: Vec::new(),
            data: Fields::new(),
            cache_ttl: Duration::ZERO,
            page: None,
            error: None,
        }
    }

    /// Columns to select; `*` when none are given
    pub fn fields<S: IntoSelections>(mut self, fields: S) -> Self {
        self.fields.extend(fields.into_selections());
        self
    }

    /// `column AS alias`
    pub fn field_as(mut self, column: &str, alias: &str) -> Self {
        self.fields.push(Selection::Aliased {
            column: column.to_string(),
            alias: alias.to_string(),
        });
        self
    }

    /// A raw SQL expression selected under `alias`
    pub fn computed(mut self, expression: &str, alias: &str) -> Self {
        self.fields.push(Selection::Computed {
            expression: expression.to_string(),
            alias: alias.to_string(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        if field.trim().is_empty() {
            self.defer_error(Error::invalid_argument("order field name is required"));
        } else {
            self.options.order_by.push(OrderBy::Column {
                field: field.to_string(),
                direction,
            });
        }
        self
    }

    pub fn order_by_asc(self, field: &str) -> Self {
        self.order_by(field, SortDirection::Asc)
    }

    pub fn order_by_desc(self, field: &str) -> Self {
        self.order_by(field, SortDirection::Desc)
    }

    pub fn order_random(mut self) -> Self {
        self.options.order_by.push(OrderBy::Random);
        self
    }

    pub fn group_by(mut self, field: &str) -> Self {
        if field.trim().is_empty() {
            self.defer_error(Error::invalid_argument("group field name is required"));
        } else {
            self.options.group_by = Some(field.to_string());
        }
        self
    }

    /// `<type> JOIN table ON table.compare_field = <this table>.against_field`
    pub fn join(self, join_type: JoinType, table: &str, compare_field: &str, against_field: &str) -> Self {
        self.push_join(join_type, table, compare_field, against_field, None)
    }

    /// Join against a table other than the one being queried
    pub fn join_with(
        self,
        join_type: JoinType,
        table: &str,
        compare_field: &str,
        with_table: &str,
        against_field: &str,
    ) -> Self {
        self.push_join(join_type, table, compare_field, against_field, Some(with_table))
    }

    pub fn inner_join(self, table: &str, compare_field: &str, against_field: &str) -> Self {
        self.join(JoinType::Inner, table, compare_field, against_field)
    }

    pub fn left_join(self, table: &str, compare_field: &str, against_field: &str) -> Self {
        self.join(JoinType::Left, table, compare_field, against_field)
    }

    pub fn right_join(self, table: &str, compare_field: &str, against_field: &str) -> Self {
        self.join(JoinType::Right, table, compare_field, against_field)
    }

    fn push_join(
        mut self,
        join_type: JoinType,
        table: &str,
        compare_field: &str,
        against_field: &str,
        with_table: Option<&str>,
    ) -> Self {
        if [table, compare_field, against_field].iter().any(|s| s.trim().is_empty()) {
            self.defer_error(Error::invalid_argument(
                "joins need a table and both field names",
            ));
            return self;
        }
        self.options.joins.push(Join {
            join_type,
            table: table.to_string(),
            compare_field: compare_field.to_string(),
            against_field: against_field.to_string(),
            with_table: with_table.map(str::to_string),
        });
        self
    }

    /// Skip the first `offset` rows
    pub fn start_at(mut self, offset: u64) -> Self {
        let count = self.options.limit.map_or(u64::MAX, |l| l.count);
        self.options.limit = Some(Limit { offset, count });
        self
    }

    /// Return at most `count` rows
    pub fn fetch(mut self, count: u64) -> Self {
        let offset = self.options.limit.map_or(0, |l| l.offset);
        self.options.limit = Some(Limit { offset, count });
        self
    }

    /// Take the next pagination slot and show `limit` rows from the offset
    /// the current request asks for in that slot
    pub fn paginate(mut self, paginator: &Paginator, limit: u64) -> Self {
        if limit == 0 {
            self.defer_error(Error::invalid_argument("page size must be at least 1"));
            return self;
        }
        let slot = paginator.next_slot();
        self = self.start_at(slot.offset).fetch(limit);
        self.page = Some(slot);
        self
    }

    /// Serve this select from the cache for up to `ttl`
    pub fn cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Cache with the handler's default TTL
    pub fn cached(self) -> Self {
        let ttl = self.handler.default_ttl();
        self.cache(ttl)
    }

    /// Row values for `insert` and `update`; later values replace earlier ones
    pub fn data<F: IntoFields>(mut self, data: F) -> Self {
        self.data.merge(data.into_fields());
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    fn checked(self) -> Result<Self> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    pub async fn select(self) -> Result<ResultSet> {
        let q = self.checked()?;
        q.handler
            .select(&q.table, &q.conditions, &q.options, &q.fields, q.cache_ttl)
            .await
    }

    /// Select and deserialize every row into `T`
    pub async fn fetch_all<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.select().await?.deserialize()
    }

    /// The first matching row
    pub async fn first(self) -> Result<Option<Row>> {
        let rows = self.fetch(1).select().await?;
        Ok(rows.first().cloned())
    }

    /// Select the current page together with the unpaginated total.
    ///
    /// Requires `paginate`.
    pub async fn select_page(self) -> Result<Page> {
        let q = self.checked()?;
        let (slot, limit) = match (q.page, q.options.limit) {
            (Some(slot), Some(limit)) => (slot, limit),
            _ => return Err(Error::invalid_argument("select_page needs paginate to be called first")),
        };
        let rows = q
            .handler
            .select(&q.table, &q.conditions, &q.options, &q.fields, q.cache_ttl)
            .await?;
        let total = q
            .handler
            .count_rows(&q.table, &q.conditions, &q.options, &q.fields, q.cache_ttl)
            .await?;
        Ok(Page {
            rows,
            total,
            limit: limit.count,
            offset: limit.offset,
            slot: slot.number,
        })
    }

    /// Insert the accumulated data, returning the generated id
    pub async fn insert(self) -> Result<u64> {
        let q = self.checked()?;
        q.handler.insert(&q.table, q.data).await
    }

    /// Update matching rows with the accumulated data
    pub async fn update(self) -> Result<u64> {
        let q = self.checked()?;
        q.handler.update(&q.table, q.data, &q.conditions).await
    }

    pub async fn delete(self) -> Result<u64> {
        let q = self.checked()?;
        q.handler.delete(&q.table, &q.conditions).await
    }

    pub async fn count(self) -> Result<u64> {
        let value = self.aggregate(Aggregate::Count, None).await?;
        Ok(value.as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or(0))
    }

    pub async fn sum(self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Sum, Some(field)).await
    }

    pub async fn average(self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Avg, Some(field)).await
    }

    pub async fn min(self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Min, Some(field)).await
    }

    pub async fn max(self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Max, Some(field)).await
    }

    async fn aggregate(self, function: Aggregate, field: Option<&str>) -> Result<Value> {
        let q = self.checked()?;
        q.handler
            .aggregate(&q.table, function, field, &q.conditions, &q.options, q.cache_ttl)
            .await
    }

    pub async fn exists(self) -> Result<bool> {
        let q = self.checked()?;
        q.handler.exists(&q.table, &q.conditions, &q.options).await
    }

    /// The value of `field` in the first matching row
    pub async fn get_field(self, field: &str) -> Result<Option<Value>> {
        let q = self.checked()?;
        q.handler
            .get_field(&q.table, field, &q.conditions, &q.options)
            .await
    }

    /// Up to `count` random matching rows
    pub async fn random(self, count: u64) -> Result<ResultSet> {
        let q = self.checked()?;
        q.handler
            .random(&q.table, count, &q.conditions, &q.options, &q.fields)
            .await
    }

    /// Save this select as the view `name`
    pub async fn create_view(self, name: &str) -> Result<()> {
        let q = self.checked()?;
        q.handler
            .create_view(name, &q.table, &q.conditions, &q.options, &q.fields)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::testing::RecordingDriver;
    use crate::{op, Connections, Params};
    use serde::Deserialize;
    use std::sync::Arc;

    async fn setup() -> (Handler<RecordingDriver>, RecordingDriver) {
        let driver = RecordingDriver::new();
        let connections = Connections::new();
        connections.add("main", driver.clone()).await.unwrap();
        let handler = Handler::new(Arc::new(connections))
            .with_cache(Arc::new(MemoryCache::new()))
            .with_default_ttl(Duration::from_secs(30));
        (handler, driver)
    }

    fn first_call(driver: &RecordingDriver) -> (String, Params) {
        driver.calls().into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_fluent_select() {
        let (db, driver) = setup().await;
        db.table("users")
            .fields(["id", "name"])
            .where_(("age", op::GTE, 18))
            .where_group(|g| g.where_(("role", "admin")).or_where(("role", "owner")))
            .or_where_group(|g| g.where_null("deleted_at").where_like("email", "@example"))
            .order_by_desc("created_at")
            .group_by("team_id")
            .start_at(40)
            .fetch(20)
            .select()
            .await
            .unwrap();

        let (sql, params) = first_call(&driver);
        assert_eq!(
            sql,
            "SELECT `id`, `name` FROM `users` WHERE `age` >= ? AND (`role` = ? OR `role` = ?) \
             OR (`deleted_at` IS NULL AND `email` LIKE ?) GROUP BY `team_id` ORDER BY `created_at` DESC LIMIT 40, 20"
        );
        assert_eq!(params.type_string(), "isss");
        assert_eq!(params.values()[3], Value::from("%@example%"));
    }

    #[tokio::test]
    async fn test_empty_in_lists() {
        let (db, driver) = setup().await;
        db.table("users").where_in("id", Vec::<i64>::new()).select().await.unwrap();
        db.table("users").where_not_in("id", Vec::<i64>::new()).select().await.unwrap();

        let selects: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|(sql, _)| sql.starts_with("SELECT"))
            .collect();
        assert_eq!(selects[0].0, "SELECT * FROM `users` WHERE ? = ?");
        assert_eq!(selects[0].1.values(), &[Value::I32(1), Value::I32(0)]);
        assert_eq!(selects[1].0, "SELECT * FROM `users` WHERE ? = ?");
        assert_eq!(selects[1].1.values(), &[Value::I32(1), Value::I32(1)]);
    }

    #[tokio::test]
    async fn test_joins() {
        let (db, driver) = setup().await;
        db.table("users")
            .left_join("orders", "user_id", "id")
            .join_with(JoinType::Inner, "items", "order_id", "orders", "id")
            .where_fields_equal("orders.status", "users.status")
            .select()
            .await
            .unwrap();

        assert_eq!(
            driver.statements(),
            vec![
                "SELECT * FROM `users` LEFT JOIN `orders` ON `orders`.`user_id` = `users`.`id` \
                 INNER JOIN `items` ON `items`.`order_id` = `orders`.`id` \
                 WHERE `orders`.`status` = `users`.`status`"
            ]
        );
    }

    #[tokio::test]
    async fn test_deferred_errors_skip_the_driver() {
        let (db, driver) = setup().await;

        let err = db.table("users").where_(("", 1)).select().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        let err = db.table("users").where_(("age", "=~", 1)).count().await.unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
        let err = db.table("users").order_by("", SortDirection::Asc).delete().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        let err = db.table("users").left_join("orders", "", "id").select().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_insert_and_update_use_data() {
        let (db, driver) = setup().await;
        let id = db
            .table("users")
            .data([("name", "a")])
            .data([("age", 3)])
            .insert()
            .await
            .unwrap();
        assert_eq!(id, 1);

        db.table("users").data([("name", "b")]).where_(("id", 1)).update().await.unwrap();
        let err = db.table("users").where_(("id", 1)).update().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        assert_eq!(
            driver.statements(),
            vec![
                "INSERT INTO `users` (`name`, `age`) VALUES (?, ?)",
                "UPDATE `users` SET `name` = ? WHERE `id` = ?",
            ]
        );
    }

    #[tokio::test]
    async fn test_cached_query() {
        let (db, driver) = setup().await;
        for _ in 0..3 {
            db.table("users").where_(("id", 1)).cached().select().await.unwrap();
        }
        assert_eq!(driver.count_starting_with("SELECT"), 1);

        db.table("users").where_(("id", 1)).data([("name", "x")]).update().await.unwrap();
        db.table("users").where_(("id", 1)).cached().select().await.unwrap();
        assert_eq!(driver.count_starting_with("SELECT"), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_deserializes() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct User {
            id: i64,
            name: String,
        }

        let (db, driver) = setup().await;
        driver.on_fetch(
            "SELECT",
            vec![Row::new().with("id", 1i64).with("name", "John")],
        );
        let users: Vec<User> = db.table("users").fetch_all().await.unwrap();
        assert_eq!(users, vec![User { id: 1, name: "John".into() }]);
    }

    #[tokio::test]
    async fn test_aggregate_terminals() {
        let (db, driver) = setup().await;
        driver.on_fetch("SUM(", vec![Row::new().with("aggregate", 30i64)]);
        let total = db.table("orders").where_(("user_id", 5)).sum("total").await.unwrap();
        assert_eq!(total, Value::I64(30));
        assert_eq!(db.table("orders").count().await.unwrap(), 0);

        assert_eq!(
            driver.statements(),
            vec![
                "SELECT SUM(`total`) AS `aggregate` FROM `orders` WHERE `user_id` = ?",
                "SELECT COUNT(*) AS `aggregate` FROM `orders` WHERE 1 = 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_first_limits_to_one_row() {
        let (db, driver) = setup().await;
        driver.on_fetch("SELECT", vec![Row::new().with("id", 3i64)]);
        let row = db.table("users").order_by_asc("id").first().await.unwrap();
        assert_eq!(row.and_then(|r| r.get("id").cloned()), Some(Value::I64(3)));
        assert_eq!(driver.statements()[0], "SELECT * FROM `users` WHERE 1 = 1 ORDER BY `id` ASC LIMIT 0, 1");
    }

    #[tokio::test]
    async fn test_create_view_from_query() {
        let (db, driver) = setup().await;
        db.table("users")
            .where_(("active", true))
            .fields("id")
            .create_view("active_users")
            .await
            .unwrap();
        assert_eq!(
            driver.statements(),
            vec!["CREATE OR REPLACE VIEW `active_users` AS SELECT `id` FROM `users` WHERE `active` = 1"]
        );
    }

    #[tokio::test]
    async fn test_select_page() {
        let (db, driver) = setup().await;
        driver.on_fetch("COUNT(*) AS `total`", vec![Row::new().with("total", 25i64)]);
        let paginator = Paginator::new("https://example.com/users?sort=name&_offset_1=10").unwrap();

        let page = db
            .table("users")
            .where_(("active", 1))
            .paginate(&paginator, 10)
            .select_page()
            .await
            .unwrap();

        assert_eq!(page.slot, 1);
        assert_eq!(page.offset, 10);
        assert_eq!(page.total, 25);
        assert_eq!(page.page_count(), 3);
        assert_eq!(page.current_page(), 2);
        assert_eq!(driver.statements()[0], "SELECT * FROM `users` WHERE `active` = ? LIMIT 10, 10");

        let err = db.table("users").select_page().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_select_page_over_join_counts_joined_rows() {
        let (db, driver) = setup().await;
        driver.on_fetch("COUNT(*) AS `total`", vec![Row::new().with("total", 3i64)]);
        let paginator = Paginator::new("/users").unwrap();

        let page = db
            .table("users")
            .left_join("orders", "user_id", "id")
            .paginate(&paginator, 10)
            .select_page()
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(
            driver.statements(),
            vec![
                "SELECT * FROM `users` LEFT JOIN `orders` ON `orders`.`user_id` = `users`.`id` WHERE 1 = 1 LIMIT 0, 10",
                "SELECT COUNT(*) AS `total` FROM `users` LEFT JOIN `orders` ON `orders`.`user_id` = `users`.`id` WHERE 1 = 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_count_ignores_pagination() {
        let (db, driver) = setup().await;
        driver.on_fetch("COUNT(*)", vec![Row::new().with("aggregate", 25i64)]);
        let paginator = Paginator::new("/users?_offset_1=20").unwrap();

        let count = db
            .table("users")
            .order_by_desc("id")
            .paginate(&paginator, 10)
            .count()
            .await
            .unwrap();
        assert_eq!(count, 25);
        assert_eq!(driver.statements(), vec!["SELECT COUNT(*) AS `aggregate` FROM `users` WHERE 1 = 1"]);
    }

    #[tokio::test]
    async fn test_exists_and_random_use_joins() {
        let (db, driver) = setup().await;
        db.table("users")
            .left_join("orders", "user_id", "id")
            .where_(("orders.status", "paid"))
            .exists()
            .await
            .unwrap();
        db.table("users")
            .left_join("orders", "user_id", "id")
            .where_(("orders.status", "paid"))
            .random(2)
            .await
            .unwrap();

        assert_eq!(
            driver.statements(),
            vec![
                "SELECT 1 AS `found` FROM `users` LEFT JOIN `orders` ON `orders`.`user_id` = `users`.`id` WHERE `orders`.`status` = ? LIMIT 0, 1",
                "SELECT * FROM `users` LEFT JOIN `orders` ON `orders`.`user_id` = `users`.`id` WHERE `orders`.`status` = ? ORDER BY RAND() LIMIT 0, 2",
            ]
        );
    }
}
