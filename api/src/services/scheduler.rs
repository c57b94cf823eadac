//! In-process backfill driver
//!
//! `BACKFILL_AUTORUN=true` 일 때 main 에서 spawn 된다. NFT 소스를 `allCompleted` 까지
//! 반복한 뒤 페이아웃 소스를 같은 방식으로 돌린다. 각 pass 사이에 고정 간격으로 쉰다.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::services::backfill::{BackfillRequest, BackfillService};

/// phase 당 최대 pass 수. 영구 실패하는 소스가 있어도 루프가 끝나도록 한다
pub const DEFAULT_MAX_PASSES: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Nft,
    Payouts,
}

impl Phase {
    fn request(self) -> BackfillRequest {
        match self {
            Phase::Nft => BackfillRequest::default(),
            Phase::Payouts => BackfillRequest { contract_address: None, backfill_payouts: Some(true) },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub passes: u32,
    pub processed: u64,
    pub completed: bool,
}

pub struct BackfillScheduler {
    service: Arc<BackfillService>,
    interval: Duration,
    max_passes: u32,
}

impl BackfillScheduler {
    pub fn new(service: Arc<BackfillService>, interval: Duration) -> Self {
        Self { service, interval, max_passes: DEFAULT_MAX_PASSES }
    }

    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// NFT → 페이아웃 순서로 끝까지 진행
    pub async fn run(&self) -> Vec<PhaseSummary> {
        let mut summaries = Vec::with_capacity(2);
        for phase in [Phase::Nft, Phase::Payouts] {
            summaries.push(self.drive(phase).await);
        }
        tracing::info!(?summaries, "backfill scheduler finished");
        summaries
    }

    async fn drive(&self, phase: Phase) -> PhaseSummary {
        let request = phase.request();
        let mut summary = PhaseSummary { phase, passes: 0, processed: 0, completed: false };

        while summary.passes < self.max_passes {
            summary.passes += 1;
            match self.service.run(&request).await {
                Ok(report) => {
                    summary.processed += report.results.iter().map(|r| r.processed).sum::<u64>();
                    for failed in report.results.iter().filter(|r| r.error.is_some()) {
                        tracing::warn!(
                            ?phase,
                            source = %failed.name,
                            chain = %failed.chain,
                            error = failed.error.as_deref().unwrap_or_default(),
                            "backfill source failed, retrying next pass"
                        );
                    }
                    if report.all_completed {
                        summary.completed = true;
                        return summary;
                    }
                }
                Err(err) => {
                    tracing::error!(?phase, pass = summary.passes, "backfill pass failed: {:#}", err);
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        tracing::warn!(?phase, passes = summary.passes, "backfill phase gave up before completing");
        summary
    }
}
