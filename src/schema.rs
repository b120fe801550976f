use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
    Connection, SqliteConnection,
};

use crate::error::{ImportError, Result};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// A destination table and the columns the importer fills, in bind order.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

pub const AGENCY: TableSpec = TableSpec {
    name: "AGENCY",
    columns: &["agencyId", "agencyName", "agencyUrl", "agencyTimeZone"],
};

pub const CALENDAR: TableSpec = TableSpec {
    name: "CALENDAR",
    columns: &[
        "serviceId",
        "isServingMonday",
        "isServingTuesday",
        "isServingWednesday",
        "isServingThursday",
        "isServingFriday",
        "isServingSaturday",
        "isServingSunday",
        "calendarStartDate",
        "calendarEndDate",
    ],
};

pub const CALENDAR_DAY: TableSpec = TableSpec {
    name: "CALENDAR_DAY",
    columns: &["calendarDayServiceId", "calendarDay"],
};

pub const CALENDAR_DATE: TableSpec = TableSpec {
    name: "CALENDAR_DATE",
    columns: &["serviceId", "calendarDate", "calendarDateExceptionType"],
};

pub const ROUTE: TableSpec = TableSpec {
    name: "ROUTE",
    columns: &[
        "routeId",
        "routeShortName",
        "routeLongName",
        "routeDesc",
        "routeType",
        "routeColor",
        "routeTextColor",
        "routeAgencyId",
    ],
};

pub const SHAPE: TableSpec = TableSpec {
    name: "SHAPE",
    columns: &["shapeId", "shapeLine"],
};

pub const STOP: TableSpec = TableSpec {
    name: "STOP",
    columns: &[
        "stopId",
        "stopCode",
        "stopName",
        "stopDesc",
        "stopLatitude",
        "stopLongitude",
        "stopZoneId",
        "stopLocationType",
        "stopPlatformCode",
        "stopParentStation",
    ],
};

pub const TRIP: TableSpec = TableSpec {
    name: "TRIP",
    columns: &[
        "tripId",
        "tripServiceId",
        "tripHeadSign",
        "tripDirectionId",
        "tripShapeId",
        "tripRouteId",
    ],
};

pub const STOP_TIME: TableSpec = TableSpec {
    name: "STOP_TIME",
    columns: &[
        "stopTimeStopId",
        "stopTimeTripId",
        "stopTimeSequence",
        "stopTimeArrival",
        "stopTimeDeparture",
    ],
};

/// Opens (creating if needed) the SQLite store with foreign keys enforced.
///
/// The WAL is synced on every commit, so a committed table survives power loss.
pub async fn open_store(path: &Path) -> Result<SqliteConnection> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    log::info!("Opening database {:?}", path);
    SqliteConnection::connect_with(&options)
        .await
        .map_err(ImportError::Database)
}

/// Drops and recreates every feed table.
pub async fn initialize_schema(conn: &mut SqliteConnection) -> Result<()> {
    log::info!("Creating database schema...");
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&mut *conn)
        .await
        .map_err(ImportError::Database)?;
    Ok(())
}

pub async fn count_rows(conn: &mut SqliteConnection, table: &TableSpec) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name);
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(&mut *conn)
        .await
        .map_err(ImportError::Database)
}
