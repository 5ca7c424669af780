//! Game calendar (`calendar` domain).

use chrono::{NaiveTime, Utc};
use sqlx::Row;

use deskside_core::{Domain, EmployeeId, GameDay, Meeting};

use crate::storage::{format_timestamp, parse_timestamp, Storage, StorageError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS game_days (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    day_number INTEGER UNIQUE NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS current_game_day (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    game_day_id INTEGER NOT NULL REFERENCES game_days(id),
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedule (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    game_day_id INTEGER NOT NULL REFERENCES game_days(id),
    title       TEXT NOT NULL,
    description TEXT,
    start_time  TEXT NOT NULL,
    end_time    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meeting_attendees (
    meeting_id  INTEGER NOT NULL REFERENCES schedule(id) ON DELETE CASCADE,
    employee_id INTEGER NOT NULL,
    PRIMARY KEY (meeting_id, employee_id)
);
"#;

const TIME_FORMAT: &str = "%H:%M";

/// Input for scheduling a meeting on the current day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMeeting {
    pub title: String,
    pub description: Option<String>,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
    pub attendees: Vec<EmployeeId>,
}

#[derive(Debug, Clone)]
pub struct CalendarRepository {
    storage: Storage,
}

impl CalendarRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        self.storage.init_schema(Domain::Calendar, SCHEMA).await
    }

    /// The current day, starting day 1 on first use.
    pub async fn current_day(&self) -> Result<GameDay, StorageError> {
        let now = format_timestamp(Utc::now());
        self.storage
            .transaction(Domain::Calendar, move |tx| {
                Box::pin(async move {
                    let current = sqlx::query(
                        r#"
                        SELECT d.day_number, d.created_at
                        FROM current_game_day c
                        JOIN game_days d ON d.id = c.game_day_id
                        WHERE c.id = 1
                        "#,
                    )
                    .fetch_optional(&mut **tx)
                    .await?;

                    let (day_number, created_at): (i64, String) = match current {
                        Some(row) => (row.try_get("day_number")?, row.try_get("created_at")?),
                        None => {
                            let day_id: i64 = sqlx::query_scalar(
                                "INSERT INTO game_days (day_number, created_at) VALUES (1, ?1) RETURNING id",
                            )
                            .bind(&now)
                            .fetch_one(&mut **tx)
                            .await?;
                            sqlx::query(
                                "INSERT INTO current_game_day (id, game_day_id, updated_at) VALUES (1, ?1, ?2)",
                            )
                            .bind(day_id)
                            .bind(&now)
                            .execute(&mut **tx)
                            .await?;
                            (1, now.clone())
                        }
                    };

                    Ok::<_, StorageError>(GameDay {
                        day_number,
                        started_at: parse_timestamp(&created_at)?,
                    })
                })
            })
            .await
    }

    /// Move to the next day and return it.
    pub async fn advance_day(&self) -> Result<GameDay, StorageError> {
        let today = self.current_day().await?;
        let next = today.day_number + 1;
        let now = Utc::now();
        let started_at = format_timestamp(now);

        self.storage
            .transaction(Domain::Calendar, move |tx| {
                Box::pin(async move {
                    sqlx::query("INSERT OR IGNORE INTO game_days (day_number, created_at) VALUES (?1, ?2)")
                        .bind(next)
                        .bind(&started_at)
                        .execute(&mut **tx)
                        .await?;
                    let day_id: i64 =
                        sqlx::query_scalar("SELECT id FROM game_days WHERE day_number = ?1")
                            .bind(next)
                            .fetch_one(&mut **tx)
                            .await?;
                    sqlx::query("UPDATE current_game_day SET game_day_id = ?1, updated_at = ?2 WHERE id = 1")
                        .bind(day_id)
                        .bind(&started_at)
                        .execute(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(())
                })
            })
            .await?;

        Ok(GameDay {
            day_number: next,
            started_at: now,
        })
    }

    /// Put a meeting on the current day's schedule.
    pub async fn schedule_meeting(&self, meeting: NewMeeting) -> Result<Meeting, StorageError> {
        let today = self.current_day().await?;
        let day_number = today.day_number;
        let record = meeting.clone();

        let id = self
            .storage
            .transaction(Domain::Calendar, move |tx| {
                Box::pin(async move {
                    let id: i64 = sqlx::query_scalar(
                        r#"
                        INSERT INTO schedule (game_day_id, title, description, start_time, end_time)
                        SELECT id, ?2, ?3, ?4, ?5 FROM game_days WHERE day_number = ?1
                        RETURNING id
                        "#,
                    )
                    .bind(day_number)
                    .bind(&record.title)
                    .bind(&record.description)
                    .bind(record.starts_at.format(TIME_FORMAT).to_string())
                    .bind(record.ends_at.format(TIME_FORMAT).to_string())
                    .fetch_one(&mut **tx)
                    .await?;

                    for attendee in &record.attendees {
                        sqlx::query(
                            "INSERT OR IGNORE INTO meeting_attendees (meeting_id, employee_id) VALUES (?1, ?2)",
                        )
                        .bind(id)
                        .bind(attendee.get())
                        .execute(&mut **tx)
                        .await?;
                    }
                    Ok::<_, StorageError>(id)
                })
            })
            .await?;

        Ok(Meeting {
            id,
            day_number,
            title: meeting.title,
            description: meeting.description,
            starts_at: meeting.starts_at,
            ends_at: meeting.ends_at,
            attendees: meeting.attendees,
        })
    }

    /// Meetings on the given day, ordered by start time.
    pub async fn meetings_on(&self, day_number: i64) -> Result<Vec<Meeting>, StorageError> {
        let mut conn = self.storage.connection(Domain::Calendar).await?;
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.title, s.description, s.start_time, s.end_time
            FROM schedule s
            JOIN game_days d ON d.id = s.game_day_id
            WHERE d.day_number = ?1
            ORDER BY s.start_time ASC, s.id ASC
            "#,
        )
        .bind(day_number)
        .fetch_all(&mut *conn)
        .await?;

        let mut meetings = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let attendees: Vec<i64> = sqlx::query_scalar(
                "SELECT employee_id FROM meeting_attendees WHERE meeting_id = ?1 ORDER BY employee_id",
            )
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
            let starts_at: String = row.try_get("start_time")?;
            let ends_at: String = row.try_get("end_time")?;

            meetings.push(Meeting {
                id,
                day_number,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                starts_at: parse_time(&starts_at)?,
                ends_at: parse_time(&ends_at)?,
                attendees: attendees.into_iter().map(EmployeeId::new).collect(),
            });
        }
        Ok(meetings)
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, StorageError> {
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|e| StorageError::Corrupt(format!("bad meeting time {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    async fn calendar(dir: &tempfile::TempDir) -> CalendarRepository {
        let repo = CalendarRepository::new(Storage::new(StorageConfig::in_dir(dir.path())));
        repo.init().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn days_start_at_one_and_advance() {
        let dir = tempfile::tempdir().unwrap();
        let repo = calendar(&dir).await;

        assert_eq!(repo.current_day().await.unwrap().day_number, 1);
        assert_eq!(repo.current_day().await.unwrap().day_number, 1);
        assert_eq!(repo.advance_day().await.unwrap().day_number, 2);
        assert_eq!(repo.current_day().await.unwrap().day_number, 2);
    }

    #[tokio::test]
    async fn meetings_are_listed_by_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let repo = calendar(&dir).await;
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

        repo.schedule_meeting(NewMeeting {
            title: "Retro".into(),
            description: None,
            starts_at: at(15, 0),
            ends_at: at(16, 0),
            attendees: vec![EmployeeId::new(3)],
        })
        .await
        .unwrap();
        let standup = repo
            .schedule_meeting(NewMeeting {
                title: "Standup".into(),
                description: Some("Daily sync".into()),
                starts_at: at(9, 30),
                ends_at: at(9, 45),
                attendees: vec![EmployeeId::new(2), EmployeeId::new(1)],
            })
            .await
            .unwrap();

        let meetings = repo.meetings_on(1).await.unwrap();
        assert_eq!(
            meetings.iter().map(|m| m.title.as_str()).collect::<Vec<_>>(),
            vec!["Standup", "Retro"]
        );
        assert_eq!(meetings[0].id, standup.id);
        assert_eq!(meetings[0].attendees, vec![EmployeeId::new(1), EmployeeId::new(2)]);
        assert!(repo.meetings_on(2).await.unwrap().is_empty());
    }
}
