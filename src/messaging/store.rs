/// Message persistence
use super::{
    validate_content, ConnectionRegistry, ConversationSummary, Message, MessageStatus,
    Participant, ParticipantKind, PushEvent,
};
use crate::{
    account::{Actor, Role},
    error::{PortalError, PortalResult},
    metrics,
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str =
    "id, sender_kind, sender_id, receiver_kind, receiver_id, content, status, created_at, read_at";

/// Message store service
pub struct MessageStore {
    db: SqlitePool,
    registry: Arc<ConnectionRegistry>,
}

impl MessageStore {
    pub fn new(db: SqlitePool, registry: Arc<ConnectionRegistry>) -> Self {
        Self { db, registry }
    }

    /// Resolve the other side of a conversation, checking the enrollment edge
    async fn counterpart(&self, actor: &Actor, counterpart_id: &str) -> PortalResult<Participant> {
        ParticipantKind::for_role(actor.role)?;

        let role: Option<String> = sqlx::query_scalar("SELECT role FROM account WHERE id = ?")
            .bind(counterpart_id)
            .fetch_optional(&self.db)
            .await?;
        let role = role
            .as_deref()
            .map(Role::from_str)
            .transpose()?
            .ok_or_else(|| PortalError::NotFound(format!("User {} not found", counterpart_id)))?;

        let (student_id, psychologist_id) = match (actor.role, role) {
            (Role::Student, Role::Psychologist) => (actor.account_id.as_str(), counterpart_id),
            (Role::Psychologist, Role::Student) => (counterpart_id, actor.account_id.as_str()),
            _ => {
                return Err(PortalError::Forbidden(
                    "Messages can only be exchanged between a student and their psychologist"
                        .to_string(),
                ))
            }
        };

        let enrolled: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM student_profile WHERE account_id = ? AND created_by = ?",
        )
        .bind(student_id)
        .bind(psychologist_id)
        .fetch_one(&self.db)
        .await?;

        if enrolled == 0 {
            return Err(PortalError::Forbidden(
                "Messages can only be exchanged between a student and their psychologist"
                    .to_string(),
            ));
        }

        Ok(Participant {
            kind: ParticipantKind::for_role(role)?,
            id: counterpart_id.to_string(),
        })
    }

    /// Persist a message, then push it to live connections of both sides
    pub async fn send(&self, sender: &Actor, receiver_id: &str, content: &str) -> PortalResult<Message> {
        validate_content(content)?;
        let receiver = self.counterpart(sender, receiver_id).await?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender: Participant {
                kind: ParticipantKind::for_role(sender.role)?,
                id: sender.account_id.clone(),
            },
            receiver,
            content: content.to_string(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            read_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO message (id, sender_kind, sender_id, receiver_kind, receiver_id, content, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'sent', ?)
            "#,
        )
        .bind(&message.id)
        .bind(message.sender.kind.as_str())
        .bind(&message.sender.id)
        .bind(message.receiver.kind.as_str())
        .bind(&message.receiver.id)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.db)
        .await?;

        metrics::record_message_sent(message.sender.kind.as_str());
        tracing::debug!(
            "Message {} stored from {} to {}",
            message.id,
            message.sender.id,
            message.receiver.id
        );

        let event = PushEvent::NewMessage {
            message: message.clone(),
        };
        self.registry.push(&message.receiver.id, &event).await;
        self.registry.push(&message.sender.id, &event).await;

        Ok(message)
    }

    /// Messages between the caller and a counterpart, oldest first
    pub async fn conversation(&self, actor: &Actor, counterpart_id: &str) -> PortalResult<Vec<Message>> {
        self.counterpart(actor, counterpart_id).await?;

        let query = format!(
            r#"
            SELECT {} FROM message
            WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
            ORDER BY seq ASC
            "#,
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(&actor.account_id)
            .bind(counterpart_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Conversations of the caller with the latest message and unread count
    pub async fn list_conversations(&self, actor: &Actor) -> PortalResult<Vec<ConversationSummary>> {
        ParticipantKind::for_role(actor.role)?;

        let rows = sqlx::query(
            r#"
            SELECT
                CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS counterpart,
                MAX(seq) AS last_seq,
                SUM(CASE WHEN receiver_id = ?1 AND status = 'sent' THEN 1 ELSE 0 END) AS unread
            FROM message
            WHERE sender_id = ?1 OR receiver_id = ?1
            GROUP BY counterpart
            ORDER BY last_seq DESC
            "#,
        )
        .bind(&actor.account_id)
        .fetch_all(&self.db)
        .await?;

        let query = format!("SELECT {} FROM message WHERE seq = ?", MESSAGE_COLUMNS);
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let last_seq: i64 = row.get("last_seq");
            let message_row = sqlx::query(&query)
                .bind(last_seq)
                .fetch_one(&self.db)
                .await?;
            let last_message = message_from_row(&message_row)?;

            let counterpart = if last_message.sender.id == actor.account_id {
                last_message.receiver.clone()
            } else {
                last_message.sender.clone()
            };

            summaries.push(ConversationSummary {
                counterpart,
                last_message,
                unread_count: row.get("unread"),
            });
        }

        Ok(summaries)
    }

    /// Mark everything the sender sent to the caller as read.
    ///
    /// Returns how many messages changed; calling again returns 0.
    pub async fn mark_as_read(&self, reader: &Actor, sender_id: &str) -> PortalResult<u64> {
        self.counterpart(reader, sender_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE message SET status = 'read', read_at = ?
            WHERE sender_id = ? AND receiver_id = ? AND status = 'sent'
            "#,
        )
        .bind(Utc::now())
        .bind(sender_id)
        .bind(&reader.account_id)
        .execute(&self.db)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::debug!("{} messages from {} read by {}", count, sender_id, reader.account_id);
            self.registry
                .push(
                    sender_id,
                    &PushEvent::MessagesRead {
                        reader_id: reader.account_id.clone(),
                        count,
                    },
                )
                .await;
        }

        Ok(count)
    }

    /// Unread messages addressed to an account
    pub async fn unread_count(&self, account_id: &str) -> PortalResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM message WHERE receiver_id = ? AND status = 'sent'",
        )
        .bind(account_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }
}

fn message_from_row(row: &SqliteRow) -> PortalResult<Message> {
    let sender_kind: String = row.get("sender_kind");
    let receiver_kind: String = row.get("receiver_kind");
    let status: String = row.get("status");

    Ok(Message {
        id: row.get("id"),
        sender: Participant {
            kind: ParticipantKind::from_str(&sender_kind)?,
            id: row.get("sender_id"),
        },
        receiver: Participant {
            kind: ParticipantKind::from_str(&receiver_kind)?,
            id: row.get("receiver_id"),
        },
        content: row.get("content"),
        status: if status == "read" {
            MessageStatus::Read
        } else {
            MessageStatus::Sent
        },
        created_at: row.try_get("created_at")?,
        read_at: row.try_get("read_at")?,
    })
}
