//! Station store backed by SQLite

pub mod models;
pub mod types;

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Executor, QueryBuilder, Sqlite};
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::{self, Broadcast, BroadcastReport, Candidate};
use crate::compactor::{self, CompactionReport};
use crate::config::DatabaseConfig;
use crate::errors::TrackerError;
use crate::features::StationFeature;
use crate::geofence::{distance_km, Campus, Geofence};
use crate::locks::StationLocks;
use crate::models::{
    strip_control_keep_newlines, EventPayload, HardwareClass, HardwareNumber, IdentityPayload,
    InboundEvent, PositionFix, PositionSample, Station, StationType, TelemetryReadings,
    TelemetrySample, TextSample,
};
use crate::path::{self, DailyPath, DaySelector, LocateMethod, Location, PlannedPoint};
use crate::reducer::{self, Outcome, PersistencePolicy, Reduction, SampleWrite, StationState};
use crate::trips::{self, Trip, TripStatistics};
use models::{
    CandidateRow, DatedRow, HardwareRow, PositionRow, StationRow, TelemetryRow, TextRow,
};
use types::{EpochSeconds, StoredNumber};

const STATION_COLUMNS: &str = "hardware_number, hardware_node, name, short_name, station_type, \
     hardware_type, last_position_id, features, updated_at";

const POSITION_COLUMNS: &str = "id, station_number, latitude, longitude, altitude, \
     ground_speed, ground_track, planned_at, recorded_at, local_date";

const TELEMETRY_COLUMNS: &str = "id, station_number, position_id, battery_level, voltage, \
     current, temperature, relative_humidity, barometric_pressure, wind_direction, wind_speed, \
     wind_gust, recorded_at, local_date";

const TEXT_COLUMNS: &str = "id, station_number, position_id, text, message_key, \
     destination_number, recorded_at, local_date";

const SAMPLE_TABLES: [&str; 3] = ["position_samples", "telemetry_samples", "text_samples"];

/// Persistent station store
///
/// Every write to a station happens while holding that station's lock, in
/// one transaction.
pub struct Database {
    pool: SqlitePool,
    locks: StationLocks,
    policy: PersistencePolicy,
    gateway: Option<HardwareNumber>,
}

impl Database {
    /// Wrap an existing pool and bring its schema up to date
    pub async fn new(pool: SqlitePool) -> Result<Self, TrackerError> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            locks: StationLocks::new(),
            policy: PersistencePolicy::default(),
            gateway: None,
        })
    }

    /// Open the database named by `config`, creating it if missing
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, TrackerError> {
        config.validate()?;

        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to an in-memory database would see its own copy
        let max_connections = if in_memory { 1 } else { config.max_connections };
        info!(
            "Connecting to database: url={}, max_connections={}",
            config.url, max_connections
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    pub fn with_policy(mut self, policy: PersistencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Station whose broadcast texts fan out to field stations
    pub fn with_gateway(mut self, gateway: Option<HardwareNumber>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply one inbound event
    pub async fn process_event(
        &self,
        event: &InboundEvent,
        campus: &Campus,
    ) -> Result<Outcome, TrackerError> {
        self.process_event_at(event, campus, Utc::now()).await
    }

    /// Apply one inbound event with an explicit processing time.
    ///
    /// On error the event can be delivered again. Only companion texts of a
    /// gateway broadcast may already be stored, and those are keyed so a
    /// retry adds just the missing ones.
    pub async fn process_event_at(
        &self,
        event: &InboundEvent,
        campus: &Campus,
        now: DateTime<Utc>,
    ) -> Result<Outcome, TrackerError> {
        let outcome = {
            let _guard = self.locks.lock(event.source).await;
            self.apply_event(event, campus, now).await?
        };

        // Rerun on duplicates too, a previous delivery may have failed half way
        let stored = matches!(outcome, Outcome::TextStored | Outcome::Duplicate);
        if stored && self.is_gateway_broadcast(event) {
            if let (Some(id), EventPayload::Text(text)) = (event.dedupe_id, &event.payload) {
                let broadcast = Broadcast {
                    id,
                    gateway: event.source,
                    text: strip_control_keep_newlines(&text.text),
                    at: event.received_at,
                };
                let report = self.record_broadcast(&broadcast, campus).await?;
                info!(
                    "Broadcast {} from {}: delivered={}, duplicates={}, failed={}",
                    id, event.source, report.delivered, report.duplicates, report.failed
                );
                // Left unacknowledged, the redelivery fills in the gaps
                if report.failed > 0 {
                    return Err(TrackerError::IncompleteBroadcast {
                        id,
                        failed: report.failed,
                    });
                }
            }
        }

        Ok(outcome)
    }

    fn is_gateway_broadcast(&self, event: &InboundEvent) -> bool {
        event.is_broadcast() && self.gateway == Some(event.source)
    }

    async fn apply_event(
        &self,
        event: &InboundEvent,
        campus: &Campus,
        now: DateTime<Utc>,
    ) -> Result<Outcome, TrackerError> {
        let mut tx = self.pool.begin().await?;

        let station = fetch_station(&mut *tx, event.source).await?;
        let last_position = match station.as_ref().and_then(|s| s.last_position_id) {
            Some(id) => fetch_position(&mut *tx, id)
                .await?
                .map(|p| p.coordinates()),
            None => None,
        };
        let hardware = match (&event.payload, &station) {
            (
                EventPayload::Identity(IdentityPayload {
                    hardware: Some(hardware_type),
                    ..
                }),
                None,
            ) => Some(hardware_class(&mut *tx, *hardware_type).await?),
            _ => None,
        };

        let state = StationState {
            station,
            last_position,
            hardware,
        };
        let mut applied = match reducer::apply(state, event, campus, &self.policy, now) {
            Reduction::Apply(applied) => *applied,
            Reduction::Drop(reason) => return Ok(Outcome::Dropped(reason)),
        };

        let number = applied.station.number;
        let recorded_at = event.received_at;
        let local_date = campus.local_date(recorded_at);

        match &applied.write {
            Some(SampleWrite::Position(fix)) => {
                let id = insert_position(&mut *tx, number, fix, recorded_at, local_date).await?;
                applied.station.last_position_id = Some(id);
            }
            Some(SampleWrite::Telemetry(readings)) => {
                insert_telemetry(
                    &mut *tx,
                    number,
                    applied.station.last_position_id,
                    readings,
                    recorded_at,
                    local_date,
                )
                .await?;
            }
            Some(SampleWrite::Text {
                text,
                message_key,
                destination,
            }) => {
                let sample = NewText {
                    station: number,
                    position_id: applied.station.last_position_id,
                    text,
                    message_key: message_key.as_deref(),
                    destination: *destination,
                    recorded_at,
                    local_date,
                };
                match insert_text(&mut *tx, &sample).await {
                    Err(TrackerError::Duplicate(key)) => {
                        debug!("Duplicate text {} from station {}", key, number);
                        return Ok(Outcome::Duplicate);
                    }
                    result => {
                        result?;
                    }
                }
            }
            None => {}
        }

        save_station(&mut *tx, &applied.station).await?;
        tx.commit().await?;

        trace!("Applied {} event from {}: {:?}", event.payload.kind(), number, applied.outcome);
        Ok(applied.outcome)
    }

    /// Current state of one station
    pub async fn get_station(&self, number: HardwareNumber) -> Result<Option<Station>, TrackerError> {
        fetch_station(&self.pool, number).await
    }

    async fn require_station(&self, number: HardwareNumber) -> Result<Station, TrackerError> {
        self.get_station(number)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("station {number}")))
    }

    /// Insert or update an entry of the hardware-class table
    pub async fn classify_hardware(&self, class: &HardwareClass) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO hardware (hardware_type, name, station_type) VALUES (?, ?, ?)
             ON CONFLICT(hardware_type) DO UPDATE SET
                name = excluded.name,
                station_type = excluded.station_type",
        )
        .bind(class.hardware_type)
        .bind(&class.name)
        .bind(class.station_type.as_str())
        .execute(&self.pool)
        .await?;

        info!(
            "Hardware class {} ({}) classified as {}",
            class.hardware_type, class.name, class.station_type
        );
        Ok(())
    }

    /// Reclassify one station, keeping its feature document in step
    pub async fn set_station_type(
        &self,
        number: HardwareNumber,
        station_type: StationType,
    ) -> Result<Station, TrackerError> {
        let _guard = self.locks.lock(number).await;
        let mut tx = self.pool.begin().await?;

        let mut station = fetch_station(&mut *tx, number)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("station {number}")))?;
        station.station_type = station_type;
        if let Some(mut feature) = station.features.take() {
            feature.apply_identity(&station);
            station.features = Some(feature);
        }

        save_station(&mut *tx, &station).await?;
        tx.commit().await?;

        info!("Station {} is now {}", number, station.station_type);
        Ok(station)
    }

    /// Record companion texts for every station that would only hear
    /// `broadcast`. Retrying the same broadcast adds nothing.
    pub async fn record_broadcast(
        &self,
        broadcast: &Broadcast,
        campus: &Campus,
    ) -> Result<BroadcastReport, TrackerError> {
        let mut report = BroadcastReport::default();
        if campus.inner.is_none() {
            debug!("No inner geofence for {}, broadcast {} reaches nobody", campus.name, broadcast.id);
            return Ok(report);
        }

        let candidates = sqlx::query_as::<_, CandidateRow>(
            "SELECT s.hardware_number, s.station_type, p.id AS last_position_id,
                    p.latitude, p.longitude
             FROM stations s
             JOIN position_samples p ON p.id = s.last_position_id
             ORDER BY s.hardware_number",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Candidate::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        for candidate in broadcast::recipients(broadcast, &candidates, campus) {
            match self.insert_companion(broadcast, candidate, campus).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    error!(
                        "Failed to record broadcast {} for station {}: {}",
                        broadcast.id, candidate.number, e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// False when the companion already exists
    async fn insert_companion(
        &self,
        broadcast: &Broadcast,
        candidate: &Candidate,
        campus: &Campus,
    ) -> Result<bool, TrackerError> {
        let _guard = self.locks.lock(candidate.number).await;
        let text = broadcast.companion_text();
        let key = broadcast.companion_key(candidate.number);
        let sample = NewText {
            station: candidate.number,
            position_id: Some(candidate.last_position_id),
            text: &text,
            message_key: Some(&key),
            destination: Some(HardwareNumber::BROADCAST),
            recorded_at: broadcast.at,
            local_date: campus.local_date(broadcast.at),
        };

        let mut conn = self.pool.acquire().await?;
        match insert_text(&mut *conn, &sample).await {
            Ok(_) => Ok(true),
            Err(TrackerError::Duplicate(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Feature documents of recently updated stations, enriched with
    /// query-time properties.
    ///
    /// Stations without a usable position are left out. With `include_all`
    /// the age limit is ignored.
    pub async fn get_consolidated_features(
        &self,
        campus: &Campus,
        max_age: Duration,
        include_all: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<StationFeature>, TrackerError> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {STATION_COLUMNS} FROM stations WHERE features IS NOT NULL"
        ));
        if !include_all {
            query
                .push(" AND updated_at > ")
                .push_bind(EpochSeconds::from(now - max_age));
        }
        query.push(" ORDER BY hardware_number");

        let rows = query
            .build_query_as::<StationRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            let station = Station::try_from(row)?;
            let Some(mut feature) = station.features else {
                continue;
            };
            let Some(position) = feature.coordinates() else {
                continue;
            };

            let age = now - station.updated_at;
            let props = &mut feature.properties;
            props.hardware_node = station.node;
            props.query.id = Some(station.number.value());
            props.query.days_old = Some(age.num_days());
            props.query.hours_old = Some(age.num_hours());
            if let Some(inner) = campus.inner.as_ref() {
                props.query.outside = Some(inner.outside(position.lat, position.lon));
                props.query.distance_km = Some(distance_km(inner.center(), position));
            }
            features.push(feature);
        }

        Ok(features)
    }

    /// One day of a station's track outside the inner fence, with telemetry
    /// and text waypoints
    pub async fn get_path(
        &self,
        number: HardwareNumber,
        selector: DaySelector,
        campus: &Campus,
    ) -> Result<DailyPath, TrackerError> {
        self.require_station(number).await?;

        let date = self
            .select_path_date(number, selector, campus.inner.as_ref())
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("path data for station {number}")))?;

        let positions = fetch_day_positions(&self.pool, number, date).await?;
        let telemetry = sqlx::query_as::<_, TelemetryRow>(&format!(
            "SELECT {TELEMETRY_COLUMNS} FROM telemetry_samples
             WHERE station_number = ? AND local_date = ?
             ORDER BY recorded_at, id"
        ))
        .bind(StoredNumber::from(number))
        .bind(date)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TelemetrySample::try_from)
        .collect::<Result<Vec<_>, _>>()?;
        let texts = sqlx::query_as::<_, TextRow>(&format!(
            "SELECT {TEXT_COLUMNS} FROM text_samples
             WHERE station_number = ? AND local_date = ?
             ORDER BY recorded_at, id"
        ))
        .bind(StoredNumber::from(number))
        .bind(date)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TextSample::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let outside: Vec<PositionSample> = positions
            .iter()
            .filter(|p| campus.outside_inner(p.coordinates()) != Some(false))
            .cloned()
            .collect();
        let telemetry = path::prefer_wind(telemetry);

        Ok(DailyPath {
            station: number,
            date,
            points: path::attach_telemetry(&outside, &telemetry),
            waypoints: path::waypoints(&texts, &positions),
        })
    }

    async fn select_path_date(
        &self,
        number: HardwareNumber,
        selector: DaySelector,
        fence: Option<&Geofence>,
    ) -> Result<Option<NaiveDate>, TrackerError> {
        let aggregate = match selector {
            DaySelector::Latest | DaySelector::Before(_) => "MAX",
            DaySelector::After(_) => "MIN",
        };
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {aggregate}(local_date) FROM position_samples WHERE station_number = "
        ));
        query.push_bind(StoredNumber::from(number));

        match selector {
            DaySelector::Latest => {}
            DaySelector::Before(date) => {
                query.push(" AND local_date < ").push_bind(date);
            }
            DaySelector::After(date) => {
                query.push(" AND local_date > ").push_bind(date);
            }
        }
        if let Some(fence) = fence {
            query
                .push(" AND NOT (latitude BETWEEN ")
                .push_bind(fence.lat_min)
                .push(" AND ")
                .push_bind(fence.lat_max)
                .push(" AND longitude BETWEEN ")
                .push_bind(fence.lon_min)
                .push(" AND ")
                .push_bind(fence.lon_max)
                .push(")");
        }

        Ok(query
            .build_query_scalar::<Option<NaiveDate>>()
            .fetch_one(&self.pool)
            .await?)
    }

    /// All excursions of one station
    pub async fn get_trips(
        &self,
        number: HardwareNumber,
        campus: &Campus,
    ) -> Result<Vec<Trip>, TrackerError> {
        let Some(inner) = campus.inner.as_ref() else {
            return Ok(Vec::new());
        };
        let positions = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM position_samples
             WHERE station_number = ?
             ORDER BY recorded_at, id"
        ))
        .bind(StoredNumber::from(number))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(PositionSample::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(trips::detect_trips(&positions, inner))
    }

    /// Trip counts and distances of every field station.
    ///
    /// A station whose history cannot be read is logged and skipped.
    pub async fn get_trip_statistics(&self, campus: &Campus) -> Result<TripStatistics, TrackerError> {
        let mut statistics = TripStatistics::default();
        if campus.inner.is_none() {
            warn!("No inner geofence for {}, trip statistics are empty", campus.name);
            return Ok(statistics);
        }

        let numbers: Vec<StoredNumber> = sqlx::query_scalar(
            "SELECT hardware_number FROM stations
             WHERE station_type NOT IN ('infrastructure', 'ignore', 'planner')
             ORDER BY hardware_number",
        )
        .fetch_all(&self.pool)
        .await?;

        for number in numbers {
            let result = match HardwareNumber::try_from(number) {
                Ok(number) => self.get_trips(number, campus).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(trips) => statistics.record_all(&trips, campus.time_zone),
                Err(e) => error!("Skipping trips of station {:?}: {}", number, e),
            }
        }

        Ok(statistics)
    }

    /// Delete interior samples of long inside-fence runs on one local day.
    ///
    /// Samples referenced by a text and the station's last position are
    /// kept. Running it again on the same day deletes nothing.
    pub async fn compact(
        &self,
        number: HardwareNumber,
        date: NaiveDate,
        campus: &Campus,
    ) -> Result<CompactionReport, TrackerError> {
        let mut report = CompactionReport::default();
        let Some(inner) = campus.inner.as_ref() else {
            debug!("No inner geofence for {}, nothing to compact", campus.name);
            return Ok(report);
        };

        let _guard = self.locks.lock(number).await;
        let mut tx = self.pool.begin().await?;

        let station = fetch_station(&mut *tx, number)
            .await?
            .ok_or_else(|| TrackerError::NotFound(format!("station {number}")))?;
        let positions = fetch_day_positions(&mut *tx, number, date).await?;

        for id in compactor::redundant_samples(&positions, inner) {
            if station.last_position_id == Some(id) {
                report.skipped += 1;
                continue;
            }
            match delete_unreferenced_position(&mut *tx, number, id).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(TrackerError::ReferentialConstraint(reason)) => {
                    debug!("Keeping position {}: {}", id, reason);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        info!(
            "Compacted station {} on {}: deleted={}, skipped={}",
            number, date, report.deleted, report.skipped
        );
        Ok(report)
    }

    /// Where a station was, or is planned to be, at `at`
    pub async fn locate(
        &self,
        number: HardwareNumber,
        at: DateTime<Utc>,
    ) -> Result<Option<Location>, TrackerError> {
        let station = self.require_station(number).await?;

        if station.station_type == StationType::Planner {
            let route: Vec<PlannedPoint> = sqlx::query_as::<_, PositionRow>(&format!(
                "SELECT {POSITION_COLUMNS} FROM position_samples
                 WHERE station_number = ? AND planned_at IS NOT NULL
                 ORDER BY planned_at, id"
            ))
            .bind(StoredNumber::from(number))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PositionSample::try_from)
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .filter_map(PlannedPoint::from_sample)
            .collect();

            return Ok(path::interpolate(&route, at).map(|coordinates| Location {
                station: number,
                at,
                coordinates,
                method: LocateMethod::Planned,
            }));
        }

        let latest = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM position_samples
             WHERE station_number = ? AND recorded_at <= ?
             ORDER BY recorded_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(StoredNumber::from(number))
        .bind(EpochSeconds::from(at))
        .fetch_optional(&self.pool)
        .await?
        .map(PositionSample::try_from)
        .transpose()?;

        Ok(latest.map(|sample| Location {
            station: number,
            at,
            coordinates: sample.coordinates(),
            method: LocateMethod::Observed,
        }))
    }

    /// Active stations not heard from within `older_than`
    pub async fn stale_stations(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Station>, TrackerError> {
        sqlx::query_as::<_, StationRow>(&format!(
            "SELECT {STATION_COLUMNS} FROM stations
             WHERE station_type = 'active' AND updated_at < ?
             ORDER BY hardware_number"
        ))
        .bind(EpochSeconds::from(now - older_than))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Station::try_from)
        .collect()
    }

    /// Recompute `local_date` of every sample in the campus time zone.
    ///
    /// Returns the number of rows that changed.
    pub async fn rebuild_local_dates(
        &self,
        campus: &Campus,
        batch_size: u32,
    ) -> Result<u64, TrackerError> {
        if batch_size == 0 {
            return Err(TrackerError::validation("batch size must be positive"));
        }

        let mut updated = 0;
        for table in SAMPLE_TABLES {
            let mut after_id = 0i64;
            loop {
                let batch = sqlx::query_as::<_, DatedRow>(&format!(
                    "SELECT id, recorded_at FROM {table} WHERE id > ? ORDER BY id LIMIT ?"
                ))
                .bind(after_id)
                .bind(batch_size)
                .fetch_all(&self.pool)
                .await?;
                let Some(last) = batch.last() else {
                    break;
                };
                after_id = last.id;

                let mut tx = self.pool.begin().await?;
                for row in &batch {
                    let local_date = campus.local_date(DateTime::try_from(row.recorded_at)?);
                    updated += sqlx::query(&format!(
                        "UPDATE {table} SET local_date = ? WHERE id = ? AND local_date != ?"
                    ))
                    .bind(local_date)
                    .bind(row.id)
                    .bind(local_date)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }
                tx.commit().await?;
            }
            debug!("Rebuilt local dates of {}", table);
        }

        info!("Rebuilt local dates for {}: {} rows changed", campus.name, updated);
        Ok(updated)
    }
}

async fn fetch_station<'e, E>(
    executor: E,
    number: HardwareNumber,
) -> Result<Option<Station>, TrackerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, StationRow>(&format!(
        "SELECT {STATION_COLUMNS} FROM stations WHERE hardware_number = ?"
    ))
    .bind(StoredNumber::from(number))
    .fetch_optional(executor)
    .await?
    .map(Station::try_from)
    .transpose()
}

async fn fetch_position<'e, E>(executor: E, id: i64) -> Result<Option<PositionSample>, TrackerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, PositionRow>(&format!(
        "SELECT {POSITION_COLUMNS} FROM position_samples WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .map(PositionSample::try_from)
    .transpose()
}

async fn fetch_day_positions<'e, E>(
    executor: E,
    number: HardwareNumber,
    date: NaiveDate,
) -> Result<Vec<PositionSample>, TrackerError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, PositionRow>(&format!(
        "SELECT {POSITION_COLUMNS} FROM position_samples
         WHERE station_number = ? AND local_date = ?
         ORDER BY recorded_at, id"
    ))
    .bind(StoredNumber::from(number))
    .bind(date)
    .fetch_all(executor)
    .await?
    .into_iter()
    .map(PositionSample::try_from)
    .collect()
}

/// Look up a hardware class, registering unknown ones as infrastructure
async fn hardware_class(
    conn: &mut SqliteConnection,
    hardware_type: i64,
) -> Result<HardwareClass, TrackerError> {
    let existing = sqlx::query_as::<_, HardwareRow>(
        "SELECT hardware_type, name, station_type FROM hardware WHERE hardware_type = ?",
    )
    .bind(hardware_type)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = existing {
        return Ok(row.into());
    }

    let class = HardwareClass::unknown(hardware_type);
    sqlx::query(
        "INSERT INTO hardware (hardware_type, name, station_type) VALUES (?, ?, ?)
         ON CONFLICT(hardware_type) DO NOTHING",
    )
    .bind(class.hardware_type)
    .bind(&class.name)
    .bind(class.station_type.as_str())
    .execute(&mut *conn)
    .await?;

    info!("Registered unknown hardware class {}", hardware_type);
    Ok(class)
}

async fn save_station(conn: &mut SqliteConnection, station: &Station) -> Result<(), TrackerError> {
    let features = station
        .features
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(&format!(
        "INSERT INTO stations ({STATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(hardware_number) DO UPDATE SET
            hardware_node = excluded.hardware_node,
            name = excluded.name,
            short_name = excluded.short_name,
            station_type = excluded.station_type,
            hardware_type = excluded.hardware_type,
            last_position_id = excluded.last_position_id,
            features = excluded.features,
            updated_at = excluded.updated_at"
    ))
    .bind(StoredNumber::from(station.number))
    .bind(&station.node)
    .bind(&station.name)
    .bind(&station.short_name)
    .bind(station.station_type.as_str())
    .bind(station.hardware_type)
    .bind(station.last_position_id)
    .bind(features)
    .bind(EpochSeconds::from(station.updated_at))
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_position(
    conn: &mut SqliteConnection,
    station: HardwareNumber,
    fix: &PositionFix,
    recorded_at: DateTime<Utc>,
    local_date: NaiveDate,
) -> Result<i64, TrackerError> {
    let result = sqlx::query(
        "INSERT INTO position_samples (
            station_number, latitude, longitude, altitude, ground_speed,
            ground_track, planned_at, recorded_at, local_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(StoredNumber::from(station))
    .bind(fix.latitude)
    .bind(fix.longitude)
    .bind(fix.altitude)
    .bind(fix.ground_speed)
    .bind(fix.ground_track)
    .bind(fix.planned_at.map(EpochSeconds::from))
    .bind(EpochSeconds::from(recorded_at))
    .bind(local_date)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_telemetry(
    conn: &mut SqliteConnection,
    station: HardwareNumber,
    position_id: Option<i64>,
    readings: &TelemetryReadings,
    recorded_at: DateTime<Utc>,
    local_date: NaiveDate,
) -> Result<i64, TrackerError> {
    let result = sqlx::query(
        "INSERT INTO telemetry_samples (
            station_number, position_id, battery_level, voltage, current,
            temperature, relative_humidity, barometric_pressure, wind_direction,
            wind_speed, wind_gust, recorded_at, local_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(StoredNumber::from(station))
    .bind(position_id)
    .bind(readings.battery_level)
    .bind(readings.voltage)
    .bind(readings.current)
    .bind(readings.temperature)
    .bind(readings.relative_humidity)
    .bind(readings.barometric_pressure)
    .bind(readings.wind_direction)
    .bind(readings.wind_speed)
    .bind(readings.wind_gust)
    .bind(EpochSeconds::from(recorded_at))
    .bind(local_date)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

struct NewText<'a> {
    station: HardwareNumber,
    position_id: Option<i64>,
    text: &'a str,
    message_key: Option<&'a str>,
    destination: Option<u32>,
    recorded_at: DateTime<Utc>,
    local_date: NaiveDate,
}

/// Fails with [`TrackerError::Duplicate`] when the message key is taken
async fn insert_text(conn: &mut SqliteConnection, sample: &NewText<'_>) -> Result<i64, TrackerError> {
    let result = sqlx::query(
        "INSERT INTO text_samples (
            station_number, position_id, text, message_key, destination_number,
            recorded_at, local_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(StoredNumber::from(sample.station))
    .bind(sample.position_id)
    .bind(sample.text)
    .bind(sample.message_key)
    .bind(sample.destination.map(i64::from))
    .bind(EpochSeconds::from(sample.recorded_at))
    .bind(sample.local_date)
    .execute(conn)
    .await;

    match result {
        Ok(result) => Ok(result.last_insert_rowid()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(TrackerError::Duplicate(
            sample.message_key.unwrap_or_default().to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Delete a position sample unless a text references it.
///
/// The reference is checked right before the delete; the foreign key
/// catches anything the check misses.
async fn delete_unreferenced_position(
    conn: &mut SqliteConnection,
    station: HardwareNumber,
    id: i64,
) -> Result<bool, TrackerError> {
    let referenced: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM text_samples WHERE position_id = ?)")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
    if referenced {
        return Err(TrackerError::ReferentialConstraint(format!(
            "position {id} is referenced by a text"
        )));
    }

    let result = sqlx::query("DELETE FROM position_samples WHERE id = ? AND station_number = ?")
        .bind(id)
        .bind(StoredNumber::from(station))
        .execute(&mut *conn)
        .await;

    match result {
        Ok(result) => Ok(result.rows_affected() > 0),
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => Err(
            TrackerError::ReferentialConstraint(format!("position {id}: {e}")),
        ),
        Err(e) => Err(e.into()),
    }
}
