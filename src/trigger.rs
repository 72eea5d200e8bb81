use crate::prelude::*;

use chrono::{Duration, Local, NaiveDateTime, NaiveTime};

const DATE_FORMAT: &str = "%d %b %Y %H:%M:%S";
const DEFAULT_EVERY: u64 = 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TriggerType {
    /// seconds between runs
    Every(u64),
    /// scheduler passes between runs
    Loops(u32),
    /// time of day
    At(NaiveTime),
    Once,
    Disabled,
}

impl TriggerType {
    /// No trigger configured (or an empty one) runs every 60 seconds.
    pub fn from_config(trigger: Option<&config::Trigger>) -> Result<Self, ConfigError> {
        let Some(trigger) = trigger else {
            return Ok(Self::Every(DEFAULT_EVERY));
        };

        if let Some(seconds) = trigger.every {
            Ok(Self::Every(seconds))
        } else if let Some(loops) = trigger.loops {
            if loops == 0 {
                return Err(ConfigError::InvalidTrigger("loops must be at least 1".into()));
            }
            Ok(Self::Loops(loops))
        } else if let Some(at) = &trigger.at {
            Ok(Self::At(parse_time_of_day(at)?))
        } else if trigger
            .once
            .as_ref()
            .is_some_and(|once| *once != serde_yaml::Value::Bool(false))
        {
            Ok(Self::Once)
        } else if trigger.disabled == Some(true) {
            Ok(Self::Disabled)
        } else {
            Ok(Self::Every(DEFAULT_EVERY))
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Every(seconds) => write!(f, "every {}s", seconds),
            Self::Loops(loops) => write!(f, "every {} loops", loops),
            Self::At(time) => write!(f, "at {}", time.format("%H:%M:%S")),
            Self::Once => write!(f, "once"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
        .map_err(|err| ConfigError::InvalidTrigger(format!("at {:?}: {}", s, err)))
}

/// Decides when one scheduled command is due. Only the owning scheduler
/// loop calls the mutating methods.
#[derive(Clone, Debug)]
pub struct Trigger {
    kind: TriggerType,
    last_run: Option<NaiveDateTime>,
    next_run: Option<NaiveDateTime>,
    togo: u32,
    fired: bool,
}

impl Trigger {
    pub fn new(kind: TriggerType) -> Self {
        Self::new_at(kind, Self::now())
    }

    pub fn new_at(kind: TriggerType, now: NaiveDateTime) -> Self {
        let next_run = match kind {
            TriggerType::Every(_) => Some(now),
            TriggerType::At(time) => Some(Self::next_occurrence(time, now)),
            _ => None,
        };

        Self {
            kind,
            last_run: None,
            next_run,
            togo: 0,
            fired: false,
        }
    }

    pub fn kind(&self) -> TriggerType {
        self.kind
    }

    pub fn is_due(&mut self) -> bool {
        self.is_due_at(Self::now())
    }

    pub fn is_due_at(&mut self, now: NaiveDateTime) -> bool {
        match self.kind {
            TriggerType::Disabled => false,
            TriggerType::Every(_) => match (self.last_run, self.next_run) {
                (None, _) => true,
                (Some(_), Some(next)) => now >= next,
                (Some(_), None) => false,
            },
            TriggerType::Loops(loops) => {
                if self.togo == 0 {
                    self.togo = loops.saturating_sub(1);
                    true
                } else {
                    self.togo -= 1;
                    false
                }
            }
            TriggerType::At(_) => self.next_run.is_some_and(|next| now >= next),
            TriggerType::Once => {
                if self.fired {
                    false
                } else {
                    self.fired = true;
                    true
                }
            }
        }
    }

    /// Records a run at the current time.
    pub fn touch(&mut self) {
        self.touch_at(Self::now())
    }

    pub fn touch_at(&mut self, now: NaiveDateTime) {
        self.last_run = Some(now);
        self.next_run = match self.kind {
            TriggerType::Every(seconds) => Some(now + Duration::seconds(seconds as i64)),
            TriggerType::At(time) => {
                let mut next = self.next_run.unwrap_or_else(|| Self::next_occurrence(time, now));
                while next <= now {
                    next += Duration::days(1);
                }
                Some(next)
            }
            _ => None,
        };
    }

    pub fn last_run(&self) -> String {
        self.last_run
            .map(|t| t.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| "Not yet run".to_string())
    }

    pub fn next_run(&self) -> String {
        self.next_run
            .map(|t| t.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    // today at `time` if that is still ahead, tomorrow otherwise
    fn next_occurrence(time: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(time);
        if now.time() < time {
            today
        } else {
            today + Duration::days(1)
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "trigger: {} last run: {} next run: {}",
            self.kind,
            self.last_run(),
            self.next_run()
        )
    }
}
