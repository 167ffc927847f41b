use rusqlite::{params, Connection, OptionalExtension};

use campmesh_shared::{Conversation, Message, MessageBody, MessageId, MemberId};

use crate::codec::{conversation_from_sql, conversation_to_sql, conversion_err, parse_ts, status_from_sql};
use crate::database::Database;
use crate::error::{Result, StoreError};

const SELECT_MESSAGE: &str = "SELECT id, conversation, sequence, from_id, from_name, content, body,
        timestamp, delivery_status, attempts
     FROM messages";

impl Database {
    /// Insert or update a message. Only status and attempts change on update.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        write_message(self.conn(), message)
    }

    /// One conversation in sequence order.
    pub fn get_messages_for_conversation(&self, conversation: &Conversation) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_MESSAGE} WHERE conversation = ?1 ORDER BY sequence, id"))?;
        let rows = stmt.query_map(params![conversation_to_sql(conversation)], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: &MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn delete_conversation(&self, conversation: &Conversation) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE conversation = ?1",
            params![conversation_to_sql(conversation)],
        )?;
        Ok(affected)
    }
}

pub(crate) fn write_message(conn: &Connection, message: &Message) -> Result<()> {
    let body = serde_json::to_string(&message.body)?;
    conn.execute(
        "INSERT INTO messages (id, conversation, sequence, from_id, from_name, content, body,
                               timestamp, delivery_status, attempts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             delivery_status = excluded.delivery_status,
             attempts = excluded.attempts",
        params![
            message.id.to_string(),
            conversation_to_sql(&message.conversation),
            message.sequence as i64,
            message.from.as_str(),
            message.from_name,
            message.content,
            body,
            message.timestamp.to_rfc3339(),
            message.delivery_status.as_str(),
            message.attempts,
        ],
    )?;
    Ok(())
}

/// Every message, conversation by conversation, in sequence order.
pub(crate) fn read_messages(conn: &Connection) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!("{SELECT_MESSAGE} ORDER BY conversation, sequence, id"))?;
    let rows = stmt.query_map([], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation: String = row.get(1)?;
    let sequence: i64 = row.get(2)?;
    let from: String = row.get(3)?;
    let body_json: String = row.get(6)?;
    let ts_str: String = row.get(7)?;
    let status: String = row.get(8)?;

    let id = uuid::Uuid::parse_str(&id_str).map_err(|e| conversion_err(0, e))?;
    let body: MessageBody = serde_json::from_str(&body_json).map_err(|e| conversion_err(6, e))?;

    Ok(Message {
        id: MessageId(id),
        from: MemberId::new(from),
        from_name: row.get(4)?,
        conversation: conversation_from_sql(1, &conversation)?,
        content: row.get(5)?,
        body,
        timestamp: parse_ts(7, &ts_str)?,
        sequence: sequence.max(0) as u64,
        delivery_status: status_from_sql(8, &status)?,
        attempts: row.get(9)?,
    })
}
