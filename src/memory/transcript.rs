//! 回合日志：只追加的 Turn 数组 + 压缩段的索引替换
//!
//! 历史从不原地修改或删除：压缩只是把一段 Turn 在实时视图中标记为“被第 K 段取代”，
//! 原始 Turn 仍在 `turns` 中，可随时按段展开审计。

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::roles::{ReviewVerdict, Role};
use crate::sandbox::{Action, Observation};
use crate::signals::Outcome;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutput {
    Advice {
        text: String,
    },
    Action {
        action: Action,
        observation: Observation,
        /// RETRY_SAME 重放
        replayed: bool,
    },
    Review {
        verdict: ReviewVerdict,
    },
    /// 角色调用失败（超时 / 格式错误）
    CallFailed {
        error: String,
    },
}

/// 一次角色调用及其结果；记录后不可变
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub index: usize,
    pub role: Role,
    pub output: TurnOutput,
    pub outcome: Option<Outcome>,
    /// 生成该回合时实时上下文的版本号
    pub context_revision: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Turn {
    pub fn action(&self) -> Option<&Action> {
        match &self.output {
            TurnOutput::Action { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn observation(&self) -> Option<&Observation> {
        match &self.output {
            TurnOutput::Action { observation, .. } => Some(observation),
            _ => None,
        }
    }

    /// 实时上下文中的文本形式
    pub fn render(&self) -> String {
        let outcome = self
            .outcome
            .as_ref()
            .map(|o| format!(" => {}", o.label()))
            .unwrap_or_default();
        match &self.output {
            TurnOutput::Advice { text } => {
                format!("[Turn {}] {}: {}", self.index, self.role, text.trim())
            }
            TurnOutput::Action {
                action,
                observation,
                replayed,
            } => {
                let exit = observation
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".into());
                let mut out = format!(
                    "[Turn {}] {}{}: $ {}\n",
                    self.index,
                    self.role,
                    if *replayed { " (replay)" } else { "" },
                    action.text().trim()
                );
                let body = observation.text();
                if !body.trim().is_empty() {
                    out.push_str(body.trim_end());
                    out.push('\n');
                }
                if let Some(detail) = &observation.detail {
                    out.push_str(&format!("({})\n", detail));
                }
                out.push_str(&format!(
                    "(exit {}, {}ms{}){}",
                    exit,
                    observation.duration_ms,
                    if observation.truncated { ", truncated" } else { "" },
                    outcome
                ));
                out
            }
            TurnOutput::Review { verdict } => {
                let mut out = format!(
                    "[Turn {}] {}: {:?} {}",
                    self.index,
                    self.role,
                    verdict.status,
                    verdict.reasoning.trim()
                );
                if !verdict.recommendations.is_empty() {
                    out.push_str(&format!("\n  next: {}", verdict.recommendations.join("; ")));
                }
                out
            }
            TurnOutput::CallFailed { error } => {
                format!("[Turn {}] {} call failed: {}{}", self.index, self.role, error, outcome)
            }
        }
    }
}

/// 一段被压缩的 Turn 的摘要
#[derive(Debug, Clone, Serialize)]
pub struct CompressedSegment {
    pub id: usize,
    /// 覆盖的 Turn 序号区间
    pub turns: Range<usize>,
    pub digest: String,
    /// 合并时被本段取代的旧段
    pub supersedes: Vec<usize>,
    pub superseded_by: Option<usize>,
}

impl CompressedSegment {
    pub fn render(&self) -> String {
        format!(
            "[Turns {}-{} compressed] {}",
            self.turns.start,
            self.turns.end.saturating_sub(1),
            self.digest
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveEntry {
    Segment(usize),
    Turn(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
    segments: Vec<CompressedSegment>,
    /// 实时视图（时间顺序）：若干段在前，其后为未压缩的 Turn
    live: Vec<LiveEntry>,
    revision: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&self) -> usize {
        self.turns.len()
    }

    pub fn revision(&self) -> usize {
        self.revision
    }

    /// 追加 Turn，序号由日志分配
    pub fn push(&mut self, mut turn: Turn) -> usize {
        let index = self.turns.len();
        turn.index = index;
        self.turns.push(turn);
        self.live.push(LiveEntry::Turn(index));
        self.revision += 1;
        index
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 全部段（含已被合并取代的）
    pub fn segments(&self) -> &[CompressedSegment] {
        &self.segments
    }

    pub fn segment(&self, id: usize) -> Option<&CompressedSegment> {
        self.segments.get(id)
    }

    pub fn live_turns(&self) -> Vec<&Turn> {
        self.live
            .iter()
            .filter_map(|e| match e {
                LiveEntry::Turn(i) => self.turns.get(*i),
                LiveEntry::Segment(_) => None,
            })
            .collect()
    }

    pub fn live_segments(&self) -> Vec<&CompressedSegment> {
        self.live
            .iter()
            .filter_map(|e| match e {
                LiveEntry::Segment(id) => self.segments.get(*id),
                LiveEntry::Turn(_) => None,
            })
            .collect()
    }

    pub fn live_turn_count(&self) -> usize {
        self.live
            .iter()
            .filter(|e| matches!(e, LiveEntry::Turn(_)))
            .count()
    }

    /// 把最早的 count 个实时 Turn 替换为一个新段，返回段 id
    pub fn fold_oldest_turns(&mut self, count: usize, digest: String) -> Option<usize> {
        let positions: Vec<usize> = self
            .live
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, LiveEntry::Turn(_)))
            .map(|(pos, _)| pos)
            .take(count)
            .collect();
        let (&first_pos, &last_pos) = (positions.first()?, positions.last()?);
        let first = match self.live[first_pos] {
            LiveEntry::Turn(i) => i,
            LiveEntry::Segment(_) => return None,
        };
        let last = match self.live[last_pos] {
            LiveEntry::Turn(i) => i,
            LiveEntry::Segment(_) => return None,
        };

        let id = self.segments.len();
        self.segments.push(CompressedSegment {
            id,
            turns: first..last + 1,
            digest,
            supersedes: Vec::new(),
            superseded_by: None,
        });
        self.live
            .splice(first_pos..=last_pos, std::iter::once(LiveEntry::Segment(id)));
        self.revision += 1;
        Some(id)
    }

    /// 把全部实时段合并为一个新段（也用于改写单个段的摘要）
    pub fn merge_live_segments(&mut self, digest: String) -> Option<usize> {
        let ids: Vec<usize> = self
            .live
            .iter()
            .filter_map(|e| match e {
                LiveEntry::Segment(id) => Some(*id),
                LiveEntry::Turn(_) => None,
            })
            .collect();
        let start = ids.iter().filter_map(|id| self.segments.get(*id)).map(|s| s.turns.start).min()?;
        let end = ids.iter().filter_map(|id| self.segments.get(*id)).map(|s| s.turns.end).max()?;

        let new_id = self.segments.len();
        for id in &ids {
            if let Some(seg) = self.segments.get_mut(*id) {
                seg.superseded_by = Some(new_id);
            }
        }
        self.segments.push(CompressedSegment {
            id: new_id,
            turns: start..end,
            digest,
            supersedes: ids,
            superseded_by: None,
        });
        self.live.retain(|e| matches!(e, LiveEntry::Turn(_)));
        self.live.insert(0, LiveEntry::Segment(new_id));
        self.revision += 1;
        Some(new_id)
    }

    /// 让全部段退出实时视图；段与原始 Turn 保留，仍可展开审计。返回退出的段数
    pub fn retire_live_segments(&mut self) -> usize {
        let before = self.live.len();
        self.live.retain(|e| matches!(e, LiveEntry::Turn(_)));
        let retired = before - self.live.len();
        if retired > 0 {
            self.revision += 1;
        }
        retired
    }

    /// 审计展开：段所覆盖的原始 Turn
    pub fn expand_segment(&self, id: usize) -> Vec<&Turn> {
        match self.segments.get(id) {
            Some(seg) => self.turns[seg.turns.start.min(self.turns.len())..seg.turns.end.min(self.turns.len())]
                .iter()
                .collect(),
            None => Vec::new(),
        }
    }

    /// 渲染实时部分（段摘要 + 实时 Turn）
    pub fn render_live(&self) -> String {
        let mut out = String::new();
        for entry in &self.live {
            let text = match entry {
                LiveEntry::Segment(id) => self.segments.get(*id).map(|s| s.render()),
                LiveEntry::Turn(i) => self.turns.get(*i).map(|t| t.render()),
            };
            if let Some(text) = text {
                out.push_str(&text);
                out.push('\n');
            }
        }
        out
    }
}
