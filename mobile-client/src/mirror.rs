//! Local copy of the server's reference data plus orders placed offline.

use crate::db::LocalDatabase;
use crate::error::StoreError;
use crate::models::{LocalOrder, SyncStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use shared::{DishView, MenuCategory, OrderItemInput, TableStatus, TableView};
use std::collections::HashMap;
use std::sync::Arc;

struct TableRow {
    id: i32,
    name: String,
    status: String,
}

impl TryFrom<TableRow> for TableView {
    type Error = StoreError;

    fn try_from(row: TableRow) -> Result<Self, Self::Error> {
        Ok(TableView { id: row.id, name: row.name, status: row.status.parse()? })
    }
}

struct DishRow {
    id: i32,
    name: String,
    price: String,
    image: Option<String>,
    category_id: i32,
}

impl TryFrom<DishRow> for DishView {
    type Error = StoreError;

    fn try_from(row: DishRow) -> Result<Self, Self::Error> {
        let price = row
            .price
            .parse::<BigDecimal>()
            .map_err(|e| StoreError::InvalidRow(format!("dish {} price {:?}: {}", row.id, row.price, e)))?;
        Ok(DishView { id: row.id, name: row.name, price, image: row.image, category_id: row.category_id })
    }
}

struct LocalOrderRow {
    temp_id: String,
    table_id: i32,
    user_id: i32,
    items: String,
    created_at: String,
    sync_status: String,
}

impl TryFrom<LocalOrderRow> for LocalOrder {
    type Error = StoreError;

    fn try_from(row: LocalOrderRow) -> Result<Self, Self::Error> {
        let items: Vec<OrderItemInput> = serde_json::from_str(&row.items)?;
        Ok(LocalOrder {
            temp_id: row.temp_id,
            table_id: row.table_id,
            user_id: row.user_id,
            items,
            created_at: parse_timestamp(&row.created_at)?,
            sync_status: row.sync_status.parse()?,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRow(format!("timestamp {:?}: {}", value, e)))
}

#[derive(Clone)]
pub struct LocalMirror {
    db: Arc<LocalDatabase>,
    category_order: Vec<String>,
}

impl LocalMirror {
    pub fn new(db: Arc<LocalDatabase>, category_order: Vec<String>) -> Self {
        Self { db, category_order }
    }

    /// Replaces every mirrored table in one transaction.
    pub fn replace_tables(&self, tables: &[TableView]) -> Result<(), StoreError> {
        self.db.with_transaction(|tx| {
            tx.execute("DELETE FROM tables", [])?;
            let mut insert = tx.prepare("INSERT INTO tables (id, name, status) VALUES (?1, ?2, ?3)")?;
            for table in tables {
                insert.execute(params![table.id, table.name, table.status.as_str()])?;
            }
            // Orders still waiting to sync keep their table occupied.
            tx.execute(
                "UPDATE tables SET status = ?1 \
                 WHERE id IN (SELECT table_id FROM local_orders WHERE sync_status = ?2)",
                params![TableStatus::Occupied.as_str(), SyncStatus::Pending.as_str()],
            )?;
            Ok(())
        })?;
        tracing::debug!(count = tables.len(), "Mirrored tables replaced");
        Ok(())
    }

    /// Replaces categories and dishes together. A dish pointing at a
    /// category outside `menu` fails the whole refresh.
    pub fn replace_menu(&self, menu: &[MenuCategory]) -> Result<(), StoreError> {
        self.db.with_transaction(|tx| {
            tx.execute("DELETE FROM dishes", [])?;
            tx.execute("DELETE FROM categories", [])?;

            let mut insert_category = tx.prepare("INSERT INTO categories (id, name) VALUES (?1, ?2)")?;
            for category in menu {
                insert_category.execute(params![category.id, category.name])?;
            }

            let mut insert_dish = tx.prepare(
                "INSERT INTO dishes (id, name, price, image, category_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for dish in menu.iter().flat_map(|category| &category.dishes) {
                insert_dish.execute(params![
                    dish.id,
                    dish.name,
                    dish.price.to_string(),
                    dish.image,
                    dish.category_id
                ])?;
            }
            Ok(())
        })?;
        tracing::debug!(categories = menu.len(), "Mirrored menu replaced");
        Ok(())
    }

    pub fn tables(&self) -> Result<Vec<TableView>, StoreError> {
        self.db.with_conn(|conn| {
            let rows = conn
                .prepare("SELECT id, name, status FROM tables ORDER BY id")?
                .query_map([], |row| {
                    Ok(TableRow { id: row.get(0)?, name: row.get(1)?, status: row.get(2)? })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(TableView::try_from).collect()
        })
    }

    /// Categories with their dishes nested. Categories named in the
    /// configured order come first, the rest follow alphabetically.
    pub fn menu(&self) -> Result<Vec<MenuCategory>, StoreError> {
        let (categories, dishes) = self.db.with_conn(|conn| {
            let categories = conn
                .prepare("SELECT id, name FROM categories")?
                .query_map([], |row| Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            let dishes = conn
                .prepare("SELECT id, name, price, image, category_id FROM dishes ORDER BY id")?
                .query_map([], |row| {
                    Ok(DishRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        price: row.get(2)?,
                        image: row.get(3)?,
                        category_id: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((categories, dishes))
        })?;

        let mut by_category: HashMap<i32, Vec<DishView>> = HashMap::new();
        for row in dishes {
            let dish = DishView::try_from(row)?;
            by_category.entry(dish.category_id).or_default().push(dish);
        }

        let mut menu: Vec<MenuCategory> = categories
            .into_iter()
            .map(|(id, name)| MenuCategory { id, name, dishes: by_category.remove(&id).unwrap_or_default() })
            .collect();
        menu.sort_by(|a, b| {
            (self.priority(&a.name), &a.name).cmp(&(self.priority(&b.name), &b.name))
        });
        Ok(menu)
    }

    fn priority(&self, name: &str) -> usize {
        self.category_order
            .iter()
            .position(|known| known == name)
            .unwrap_or(self.category_order.len())
    }

    pub fn mark_table(&self, table_id: i32, status: TableStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| mark_table(conn, table_id, status))
    }

    pub fn local_orders(&self) -> Result<Vec<LocalOrder>, StoreError> {
        self.db.with_conn(|conn| {
            let rows = conn
                .prepare(
                    "SELECT temp_id, table_id, user_id, items, created_at, sync_status
                     FROM local_orders ORDER BY created_at, temp_id",
                )?
                .query_map([], |row| {
                    Ok(LocalOrderRow {
                        temp_id: row.get(0)?,
                        table_id: row.get(1)?,
                        user_id: row.get(2)?,
                        items: row.get(3)?,
                        created_at: row.get(4)?,
                        sync_status: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(LocalOrder::try_from).collect()
        })
    }

    pub fn set_local_order_status(&self, temp_id: &str, status: SyncStatus) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| set_local_order_status(conn, temp_id, status))
    }

    /// Drops local orders the server has confirmed.
    pub fn prune_synced_orders(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM local_orders WHERE sync_status = ?1", [SyncStatus::Synced.as_str()])?)
        })
    }
}

pub(crate) fn mark_table(conn: &Connection, table_id: i32, status: TableStatus) -> Result<(), StoreError> {
    conn.execute("UPDATE tables SET status = ?1 WHERE id = ?2", params![status.as_str(), table_id])?;
    Ok(())
}

pub(crate) fn insert_local_order(conn: &Connection, order: &LocalOrder) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO local_orders (temp_id, table_id, user_id, items, created_at, sync_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            order.temp_id,
            order.table_id,
            order.user_id,
            serde_json::to_string(&order.items)?,
            order.created_at.to_rfc3339(),
            order.sync_status.as_str()
        ],
    )?;
    Ok(())
}

pub(crate) fn set_local_order_status(conn: &Connection, temp_id: &str, status: SyncStatus) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE local_orders SET sync_status = ?1 WHERE temp_id = ?2",
        params![status.as_str(), temp_id],
    )?;
    Ok(changed > 0)
}
