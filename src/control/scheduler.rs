//! Time-of-day scheduling: climate mode windows, per-device on/off
//! schedules, and light-intensity ramps.
//!
//! All interval checks work on the 0-1440 minute ring with half-open
//! semantics: an interval whose end precedes its start wraps midnight, and
//! `[s, s)` is empty. Overnight device schedules stay active past midnight
//! even when pinned to a day of week — a Monday 22:00-06:00 light schedule
//! is still on at Tuesday 05:30.

use serde::{Deserialize, Serialize};

use crate::store::types::ScheduleRecord;
use crate::zone::Zone;

pub const MINUTES_PER_DAY: u16 = 1440;

/// Climate mode derived from wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClimateMode {
    PreDay,
    Day,
    PreNight,
    Night,
}

impl ClimateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreDay => "PRE_DAY",
            Self::Day => "DAY",
            Self::PreNight => "PRE_NIGHT",
            Self::Night => "NIGHT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRE_DAY" => Some(Self::PreDay),
            "DAY" => Some(Self::Day),
            "PRE_NIGHT" => Some(Self::PreNight),
            "NIGHT" => Some(Self::Night),
            _ => None,
        }
    }
}

/// A wall-clock instant for schedule evaluation.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    /// Minutes since local midnight, fractional for ramp math.
    pub minutes: f64,
}

impl WallClock {
    pub fn now() -> Self {
        use chrono::{Datelike, Local, Timelike};
        let now = Local::now();
        Self {
            weekday: now.weekday().num_days_from_monday() as u8,
            minutes: f64::from(now.hour() * 60 + now.minute()) + f64::from(now.second()) / 60.0,
        }
    }

    pub fn minute(&self) -> u16 {
        (self.minutes as u16) % MINUTES_PER_DAY
    }

    fn yesterday_weekday(&self) -> u8 {
        (self.weekday + 6) % 7
    }
}

/// Parse "HH:MM" (optionally "HH:MM:SS") into minutes since midnight.
pub fn time_to_minutes(s: &str) -> Option<u16> {
    let mut parts = s.split(':');
    let hour: u16 = parts.next()?.trim().parse().ok()?;
    let minute: u16 = parts.next()?.trim().parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

/// Half-open membership on the minute ring; `start > end` wraps midnight.
pub fn is_time_in_range(t: u16, start: u16, end: u16) -> bool {
    if start <= end {
        start <= t && t < end
    } else {
        t >= start || t < end
    }
}

/// Details of the currently active schedule, used for logging and ramps.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveScheduleDetails {
    pub schedule_id: u64,
    pub ramp_up_duration: Option<i64>,
    pub ramp_down_duration: Option<i64>,
    pub photoperiod_hours: f64,
}

/// Evaluates device schedules against the wall clock.
pub struct Scheduler {
    schedules: Vec<ScheduleRecord>,
}

impl Scheduler {
    pub fn new(schedules: Vec<ScheduleRecord>) -> Self {
        Self { schedules }
    }

    pub fn update(&mut self, schedules: Vec<ScheduleRecord>) {
        self.schedules = schedules;
    }

    pub fn schedules(&self) -> &[ScheduleRecord] {
        &self.schedules
    }

    fn matches_now(&self, schedule: &ScheduleRecord, clock: WallClock) -> bool {
        if !schedule.enabled {
            return false;
        }
        let (Some(start), Some(end)) = (
            time_to_minutes(&schedule.start_time),
            time_to_minutes(&schedule.end_time),
        ) else {
            return false;
        };
        let t = clock.minute();
        if !is_time_in_range(t, start, end) {
            return false;
        }
        match schedule.day_of_week {
            None => true,
            Some(dow) => {
                if dow == clock.weekday {
                    return true;
                }
                // Overnight schedule rolling past midnight into today.
                start > end && t < end && dow == clock.yesterday_weekday()
            }
        }
    }

    /// The active schedule for a device, if any.
    pub fn active_schedule(
        &self,
        zone: &Zone,
        device: &str,
        clock: WallClock,
    ) -> Option<&ScheduleRecord> {
        self.schedules.iter().find(|s| {
            s.location == zone.location
                && s.cluster == zone.cluster
                && s.device_name == device
                && self.matches_now(s, clock)
        })
    }

    /// Scheduled on/off state: `Some((state, schedule_id))` when a schedule
    /// is active. NIGHT-tagged schedules switch devices off.
    pub fn schedule_state(
        &self,
        zone: &Zone,
        device: &str,
        clock: WallClock,
    ) -> Option<(u8, u64)> {
        let schedule = self.active_schedule(zone, device, clock)?;
        let state = match schedule.mode.as_deref() {
            Some(mode) if mode.eq_ignore_ascii_case("NIGHT") => 0,
            _ => 1,
        };
        Some((state, schedule.id))
    }

    /// Ramp durations and photoperiod of the active schedule.
    pub fn active_schedule_details(
        &self,
        zone: &Zone,
        device: &str,
        clock: WallClock,
    ) -> Option<ActiveScheduleDetails> {
        let schedule = self.active_schedule(zone, device, clock)?;
        let start = time_to_minutes(&schedule.start_time)? as i64;
        let end = time_to_minutes(&schedule.end_time)? as i64;
        let photoperiod_minutes = if end < start {
            end + i64::from(MINUTES_PER_DAY) - start
        } else {
            end - start
        };
        Some(ActiveScheduleDetails {
            schedule_id: schedule.id,
            ramp_up_duration: schedule.ramp_up_duration,
            ramp_down_duration: schedule.ramp_down_duration,
            photoperiod_hours: photoperiod_minutes as f64 / 60.0,
        })
    }

    /// Target intensity for a dimmable device under an active schedule.
    ///
    /// `None` when no schedule is active or the schedule carries no
    /// `target_intensity` (plain on/off behaviour applies then).
    pub fn schedule_intensity(
        &self,
        zone: &Zone,
        device: &str,
        clock: WallClock,
        current_intensity: Option<f64>,
    ) -> Option<f64> {
        let schedule = self.active_schedule(zone, device, clock)?;
        let target = schedule.target_intensity?;
        let start = f64::from(time_to_minutes(&schedule.start_time)?);
        let end = f64::from(time_to_minutes(&schedule.end_time)?);
        let now = clock.minutes;

        // Minutes since start / until end, unwrapped across midnight.
        let (since_start, until_end) = if start > end {
            if now >= start {
                (now - start, end + f64::from(MINUTES_PER_DAY) - now)
            } else {
                (now + f64::from(MINUTES_PER_DAY) - start, end - now)
            }
        } else {
            (now - start, end - now)
        };

        let ramp_up = schedule.ramp_up_duration.unwrap_or(0) as f64;
        let ramp_down = schedule.ramp_down_duration.unwrap_or(0) as f64;

        let intensity = if ramp_up > 0.0 && since_start < ramp_up {
            let current = current_intensity.unwrap_or(0.0);
            let progress = (since_start / ramp_up).min(1.0);
            current + (target - current) * progress
        } else if ramp_down > 0.0 && until_end < ramp_down {
            let current = current_intensity.unwrap_or(target);
            let progress = (until_end / ramp_down).min(1.0);
            current * progress
        } else {
            target
        };
        Some(intensity.clamp(0.0, 100.0))
    }
}

/// Compute the climate mode from the room's day window and pre-durations.
///
/// Windows on the minute ring, checked in priority order:
/// PRE_DAY `[(day_start - pre_day) mod 1440, day_start)`, DAY
/// `[day_start, day_end)`, PRE_NIGHT `[day_end, (day_end + pre_night) mod
/// 1440)`, NIGHT everything else. Returns (mode, window start, window end).
pub fn climate_mode(
    day_start: u16,
    day_end: u16,
    pre_day_duration: u16,
    pre_night_duration: u16,
    minute: u16,
) -> (ClimateMode, u16, u16) {
    let ring = i32::from(MINUTES_PER_DAY);
    let pre_day_start = ((i32::from(day_start) - i32::from(pre_day_duration)).rem_euclid(ring)) as u16;
    let pre_night_end = ((i32::from(day_end) + i32::from(pre_night_duration)) % ring) as u16;

    if pre_day_duration > 0 && is_time_in_range(minute, pre_day_start, day_start) {
        return (ClimateMode::PreDay, pre_day_start, day_start);
    }
    if is_time_in_range(minute, day_start, day_end) {
        return (ClimateMode::Day, day_start, day_end);
    }
    if pre_night_duration > 0 && is_time_in_range(minute, day_end, pre_night_end) {
        return (ClimateMode::PreNight, day_end, pre_night_end);
    }
    (ClimateMode::Night, pre_night_end, pre_day_start)
}
