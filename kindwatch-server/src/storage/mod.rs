pub mod models;
pub mod schema;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    AppUsage, Device, Location, NewAppUsage, NewDevice, NewLocation, NewSession, NewWebHistoryRow,
    NewZone, SettingsRow, WebHistoryRow, Zone,
};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A usage report item that already passed per-item validation.
/// Only usage-owned fields appear here; rule fields are never reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppReportRecord {
    pub package_name: String,
    pub app_name: String,
    pub used_minutes: i32,
    pub last_reported_at: NaiveDateTime,
}

/// Rule defaults seeded on first sight of a package. Applied on insert only;
/// an upsert conflict never touches them.
pub const DEFAULT_DAILY_LIMIT_MINUTES: i32 = 60;

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    // Devices

    pub async fn create_device(&self, device_id: &str, name: &str) -> Result<Device, StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        let id_owned = device_id.to_string();
        let name_owned = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Device, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewDevice {
                id: &id_owned,
                name: &name_owned,
                is_paired: true,
            };
            diesel::insert_into(d::devices).values(&row).execute(&mut conn)?;
            Ok(d::devices.filter(d::id.eq(&id_owned)).first::<Device>(&mut conn)?)
        })
        .await?
    }

    pub async fn get_device(&self, device_id: &str) -> Result<Option<Device>, StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        let id_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Device>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(d::devices
                .filter(d::id.eq(&id_owned))
                .first::<Device>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Device>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(d::devices.order(d::created_at.asc()).load::<Device>(&mut conn)?)
        })
        .await?
    }

    pub async fn touch_device_seen(&self, device_id: &str) -> Result<(), StorageError> {
        use schema::devices::dsl as d;
        let pool = self.pool.clone();
        let id_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            diesel::update(d::devices.filter(d::id.eq(&id_owned)))
                .set(d::last_seen_at.eq(Some(now)))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    /// Remove a device together with everything reported by it.
    /// Returns `false` if no such device existed.
    pub async fn delete_device_cascade(&self, device_id: &str) -> Result<bool, StorageError> {
        let pool = self.pool.clone();
        let id_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            use schema::{app_usage, devices, locations, web_history};
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut deleted = false;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                diesel::delete(app_usage::table.filter(app_usage::device_id.eq(&id_owned)))
                    .execute(conn)?;
                diesel::delete(locations::table.filter(locations::device_id.eq(&id_owned)))
                    .execute(conn)?;
                diesel::delete(web_history::table.filter(web_history::device_id.eq(&id_owned)))
                    .execute(conn)?;
                let n = diesel::delete(devices::table.filter(devices::id.eq(&id_owned)))
                    .execute(conn)?;
                deleted = n > 0;
                Ok(())
            })?;
            Ok(deleted)
        })
        .await?
    }

    // App usage reconciliation

    /// Upsert a batch of validated reports for one device.
    ///
    /// The conflict branch deliberately sets only usage-owned columns;
    /// `is_blocked` and `daily_limit_minutes` belong to the parent and must
    /// survive any number of device reports.
    pub async fn upsert_app_reports(
        &self,
        device_id: &str,
        reports: Vec<AppReportRecord>,
    ) -> Result<usize, StorageError> {
        use schema::app_usage::dsl as au;
        if reports.is_empty() {
            return Ok(0);
        }
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let mut applied = 0usize;
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                for r in &reports {
                    let row = NewAppUsage {
                        device_id: &device_owned,
                        package_name: &r.package_name,
                        app_name: &r.app_name,
                        used_today_minutes: r.used_minutes,
                        is_blocked: false,
                        daily_limit_minutes: DEFAULT_DAILY_LIMIT_MINUTES,
                        last_reported_at: r.last_reported_at,
                    };
                    diesel::insert_into(au::app_usage)
                        .values(&row)
                        .on_conflict((au::device_id, au::package_name))
                        .do_update()
                        .set((
                            au::app_name.eq(&r.app_name),
                            au::used_today_minutes.eq(r.used_minutes),
                            au::last_reported_at.eq(r.last_reported_at),
                        ))
                        .execute(conn)?;
                    applied += 1;
                }
                Ok(())
            })?;
            Ok(applied)
        })
        .await?
    }

    pub async fn list_app_usage(&self, device_id: &str) -> Result<Vec<AppUsage>, StorageError> {
        use schema::app_usage::dsl as au;
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<AppUsage>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(au::app_usage
                .filter(au::device_id.eq(&device_owned))
                .order(au::package_name.asc())
                .load::<AppUsage>(&mut conn)?)
        })
        .await?
    }

    /// Parent-authored rule edit. Touches only the rule columns it was given;
    /// usage counters stay whatever the device last reported.
    pub async fn update_app_rules(
        &self,
        device_id: &str,
        package_name: &str,
        is_blocked: Option<bool>,
        daily_limit_minutes: Option<i32>,
    ) -> Result<Option<AppUsage>, StorageError> {
        use schema::app_usage::dsl as au;
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        let package_owned = package_name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<AppUsage>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let target = au::app_usage
                .filter(au::device_id.eq(&device_owned))
                .filter(au::package_name.eq(&package_owned));
            let existing = target.first::<AppUsage>(&mut conn).optional()?;
            let Some(existing) = existing else {
                return Ok(None);
            };
            diesel::update(target)
                .set((
                    au::is_blocked.eq(is_blocked.unwrap_or(existing.is_blocked)),
                    au::daily_limit_minutes
                        .eq(daily_limit_minutes.unwrap_or(existing.daily_limit_minutes)),
                ))
                .execute(&mut conn)?;
            Ok(target.first::<AppUsage>(&mut conn).optional()?)
        })
        .await?
    }

    // Location

    pub async fn insert_location(
        &self,
        device_id: &str,
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
    ) -> Result<(), StorageError> {
        use schema::locations::dsl as l;
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewLocation {
                device_id: &device_owned,
                latitude,
                longitude,
                accuracy,
            };
            diesel::insert_into(l::locations).values(&row).execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn latest_location(&self, device_id: &str) -> Result<Option<Location>, StorageError> {
        use schema::locations::dsl as l;
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Location>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(l::locations
                .filter(l::device_id.eq(&device_owned))
                .order(l::recorded_at.desc())
                .first::<Location>(&mut conn)
                .optional()?)
        })
        .await?
    }

    // Web history

    pub async fn insert_web_history(
        &self,
        device_id: &str,
        entries: &[(String, Option<String>)],
    ) -> Result<(), StorageError> {
        use schema::web_history::dsl as wh;
        if entries.is_empty() {
            return Ok(());
        }
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        let entries_owned = entries.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            for (url, title) in &entries_owned {
                let row = NewWebHistoryRow {
                    device_id: &device_owned,
                    url,
                    title: title.as_deref(),
                };
                diesel::insert_into(wh::web_history).values(&row).execute(&mut conn)?;
            }
            Ok(())
        })
        .await?
    }

    pub async fn list_web_history(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<WebHistoryRow>, StorageError> {
        use schema::web_history::dsl as wh;
        let pool = self.pool.clone();
        let device_owned = device_id.to_string();
        let limit = limit.clamp(1, 1000);
        tokio::task::spawn_blocking(move || -> Result<Vec<WebHistoryRow>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(wh::web_history
                .filter(wh::device_id.eq(&device_owned))
                .order(wh::visited_at.desc())
                .limit(limit)
                .load::<WebHistoryRow>(&mut conn)?)
        })
        .await?
    }

    // Zones

    pub async fn list_zones(&self) -> Result<Vec<Zone>, StorageError> {
        use schema::zones::dsl as z;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Zone>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(z::zones.order(z::name.asc()).load::<Zone>(&mut conn)?)
        })
        .await?
    }

    pub async fn create_zone(
        &self,
        name: &str,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> Result<Zone, StorageError> {
        use schema::zones::dsl as z;
        let pool = self.pool.clone();
        let name_owned = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<Zone, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let row = NewZone {
                name: &name_owned,
                latitude,
                longitude,
                radius_m,
            };
            Ok(diesel::insert_into(z::zones)
                .values(&row)
                .get_result::<Zone>(&mut conn)?)
        })
        .await?
    }

    // Settings (singleton document, monotonic revision)

    pub async fn get_settings(&self) -> Result<SettingsRow, StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<SettingsRow, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(load_or_seed_settings(&mut conn)?)
        })
        .await?
    }

    /// Merge provided fields into the singleton and bump `revision` by one.
    /// Runs in an immediate transaction so two concurrent updates can never
    /// observe or produce the same revision.
    pub async fn update_settings(
        &self,
        bedtime_weeknight: Option<String>,
        bedtime_weekend: Option<String>,
        uninstall_protection: Option<bool>,
        location_tracking: Option<bool>,
    ) -> Result<SettingsRow, StorageError> {
        use schema::settings::dsl as s;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<SettingsRow, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let updated = conn.immediate_transaction(|conn| -> Result<SettingsRow, StorageError> {
                let current = load_or_seed_settings(conn)?;
                diesel::update(s::settings.filter(s::id.eq(current.id)))
                    .set((
                        s::bedtime_weeknight
                            .eq(bedtime_weeknight.as_deref().unwrap_or(&current.bedtime_weeknight)),
                        s::bedtime_weekend
                            .eq(bedtime_weekend.as_deref().unwrap_or(&current.bedtime_weekend)),
                        s::uninstall_protection
                            .eq(uninstall_protection.unwrap_or(current.uninstall_protection)),
                        s::location_tracking
                            .eq(location_tracking.unwrap_or(current.location_tracking)),
                        s::revision.eq(current.revision + 1),
                    ))
                    .execute(conn)?;
                Ok(s::settings
                    .filter(s::id.eq(current.id))
                    .first::<SettingsRow>(conn)?)
            })?;
            Ok(updated)
        })
        .await?
    }

    // Session helpers for JWT inactivity windows

    pub async fn create_session(&self, jti_: &str, username_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        let u = username_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession {
                jti: &j,
                username: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }
}

const SETTINGS_SINGLETON_ID: i32 = 1;

fn load_or_seed_settings(conn: &mut SqliteConnection) -> Result<SettingsRow, StorageError> {
    use schema::settings::dsl as s;
    diesel::insert_into(s::settings)
        .values(s::id.eq(SETTINGS_SINGLETON_ID))
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(s::settings
        .filter(s::id.eq(SETTINGS_SINGLETON_ID))
        .first::<SettingsRow>(conn)?)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
