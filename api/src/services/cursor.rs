//! Cursor/Sync State Machine
//!
//! ```text
//!   Fresh ──page──▶ InProgress ──page──▶ ... ──(다음 커서 없음)──▶ Done
//!     ▲                                                           │
//!     └─────────────────────────── reset ─────────────────────────┘
//! ```
//!
//! 한 번 호출에 한 페이지. 페이지 조회가 실패하면 커서는 바뀌지 않는다.

use chrono::Utc;

use crate::db::SyncCursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// 커서 행 없음
    Fresh,
    InProgress { cursor: String, last_block: i64 },
    /// 종료 상태. reset 전까지 외부 호출 없이 건너뛴다
    Done { last_block: i64 },
}

impl SyncState {
    pub fn from_row(row: Option<&SyncCursor>) -> Self {
        match row {
            None => SyncState::Fresh,
            Some(row) if row.completed => SyncState::Done { last_block: row.last_block },
            Some(row) => match row.cursor.as_deref().filter(|c| !c.is_empty()) {
                Some(cursor) => SyncState::InProgress {
                    cursor: cursor.to_string(),
                    last_block: row.last_block,
                },
                // 커서 없이 미완료로 남은 행은 처음부터 다시
                None => SyncState::Fresh,
            },
        }
    }

    /// 다음 페이지 요청에 쓸 커서
    pub fn request_cursor(&self) -> Option<&str> {
        match self {
            SyncState::InProgress { cursor, .. } => Some(cursor),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SyncState::Done { .. })
    }

    fn last_block(&self) -> i64 {
        match self {
            SyncState::Fresh => 0,
            SyncState::InProgress { last_block, .. } | SyncState::Done { last_block } => *last_block,
        }
    }

    /// 페이지 처리 후 저장할 커서 행
    ///
    /// `page_last_block` 은 페이지 마지막 항목의 블록. 빈 페이지면 이전 값을 유지한다.
    pub fn advance(
        &self,
        source_key: &str,
        next_cursor: Option<String>,
        page_last_block: Option<i64>,
    ) -> SyncCursor {
        let next_cursor = next_cursor.filter(|c| !c.is_empty());
        SyncCursor {
            source_key: source_key.to_string(),
            completed: next_cursor.is_none(),
            cursor: next_cursor,
            last_block: page_last_block.unwrap_or_else(|| self.last_block()),
            updated_at: Utc::now(),
        }
    }
}

/// 컨트랙트 소스 키
pub fn contract_source_key(contract_id: &uuid::Uuid) -> String {
    format!("contract:{}", contract_id)
}

/// 페이아웃 소스 키 (지갑 × 체인)
pub fn payout_source_key(wallet: &str, chain: crate::types::Chain) -> String {
    format!("payout:{}:{}", wallet.to_lowercase(), chain)
}
