//! Run-loop timers that bun-webkit expects its embedder to provide.
//!
//! JSC schedules its GC activity callbacks through `WTFTimer__*`. The bridge has
//! no event loop and no helper threads, so timers are only recorded here and
//! fired by [`run_due_timers`], which the bridge calls on the VM thread after a
//! script returns. The system framework on macOS brings its own run loop and
//! never calls into this module.

use parking_lot::Mutex;
use std::ffi::c_void;
use std::time::{Duration, Instant};

type TimerCallback = unsafe extern "C" fn(*mut c_void);

pub struct WTFTimer {
    callback: TimerCallback,
    user_data: *mut c_void,
    schedule: Mutex<Schedule>,
}

#[derive(Default)]
struct Schedule {
    fire_at: Option<Instant>,
    repeat: Option<Duration>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct TimerPtr(*mut WTFTimer);

// SAFETY: timers are created, fired and destroyed on the VM thread; the
// registry only stores their addresses.
unsafe impl Send for TimerPtr {}

static TIMERS: Mutex<Vec<TimerPtr>> = Mutex::new(Vec::new());

impl WTFTimer {
    fn is_active(&self) -> bool {
        self.schedule.lock().fire_at.is_some()
    }

    fn seconds_until_fire(&self) -> f64 {
        match self.schedule.lock().fire_at {
            Some(at) => at.saturating_duration_since(Instant::now()).as_secs_f64(),
            None => f64::INFINITY,
        }
    }

    /// Advances the schedule if the timer is due; returns whether to fire.
    fn take_due(&self, now: Instant) -> bool {
        let mut schedule = self.schedule.lock();
        match schedule.fire_at {
            Some(at) if at <= now => {
                schedule.fire_at = schedule.repeat.map(|interval| now + interval);
                true
            }
            _ => false,
        }
    }
}

/// Fires every registered timer whose deadline has passed.
///
/// Returns the number of callbacks invoked. Always 0 on macOS.
pub fn run_due_timers() -> usize {
    let now = Instant::now();
    let due: Vec<TimerPtr> = TIMERS
        .lock()
        .iter()
        .copied()
        // SAFETY: registered pointers stay valid until `WTFTimer__deinit`
        // removes them under the same lock.
        .filter(|timer| unsafe { (*timer.0).take_due(now) })
        .collect();

    let mut fired = 0;
    for timer in due {
        // A callback may deinit a timer that is later in this batch.
        if !TIMERS.lock().contains(&timer) {
            continue;
        }
        // SAFETY: still registered, so still alive.
        unsafe {
            let timer = &*timer.0;
            (timer.callback)(timer.user_data);
        }
        fired += 1;
    }
    fired
}

/// # Safety
/// `user_data` must stay valid for the lifetime of the timer.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__create(
    callback: TimerCallback,
    user_data: *mut c_void,
) -> *mut WTFTimer {
    let timer = Box::into_raw(Box::new(WTFTimer {
        callback,
        user_data,
        schedule: Mutex::new(Schedule::default()),
    }));
    TIMERS.lock().push(TimerPtr(timer));
    timer
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__update(timer: *mut WTFTimer, delay_seconds: f64, repeat: bool) {
    let Some(timer) = (unsafe { timer.as_ref() }) else {
        return;
    };
    let delay = Duration::from_secs_f64(delay_seconds.max(0.0));
    let mut schedule = timer.schedule.lock();
    schedule.fire_at = Some(Instant::now() + delay);
    schedule.repeat = repeat.then_some(delay);
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__cancel(timer: *mut WTFTimer) {
    if let Some(timer) = unsafe { timer.as_ref() } {
        *timer.schedule.lock() = Schedule::default();
    }
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__isActive(timer: *mut WTFTimer) -> bool {
    unsafe { timer.as_ref() }.is_some_and(WTFTimer::is_active)
}

/// # Safety
/// `timer` must come from `WTFTimer__create`.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__secondsUntilTimer(timer: *mut WTFTimer) -> f64 {
    unsafe { timer.as_ref() }.map_or(f64::INFINITY, WTFTimer::seconds_until_fire)
}

/// # Safety
/// `timer` must come from `WTFTimer__create` and is invalid afterwards.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn WTFTimer__deinit(timer: *mut WTFTimer) {
    if timer.is_null() {
        return;
    }
    TIMERS.lock().retain(|registered| registered.0 != timer);
    drop(unsafe { Box::from_raw(timer) });
}

/// Called by WTF when it wants zero-delay work run now.
#[cfg(not(target_os = "macos"))]
#[unsafe(no_mangle)]
pub extern "C" fn WTFTimer__runIfImminent() {
    run_due_timers();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static HITS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn bump(_data: *mut c_void) {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn timer() -> WTFTimer {
        WTFTimer {
            callback: bump,
            user_data: std::ptr::null_mut(),
            schedule: Mutex::new(Schedule::default()),
        }
    }

    #[test]
    fn test_inactive_timer_is_never_due() {
        let timer = timer();
        assert!(!timer.is_active());
        assert!(!timer.take_due(Instant::now()));
        assert_eq!(timer.seconds_until_fire(), f64::INFINITY);
    }

    #[test]
    fn test_one_shot_timer_deactivates_after_firing() {
        let timer = timer();
        timer.schedule.lock().fire_at = Some(Instant::now());
        assert!(timer.take_due(Instant::now()));
        assert!(!timer.is_active());
    }

    #[test]
    fn test_repeating_timer_reschedules() {
        let timer = timer();
        {
            let mut schedule = timer.schedule.lock();
            schedule.fire_at = Some(Instant::now());
            schedule.repeat = Some(Duration::from_secs(60));
        }
        assert!(timer.take_due(Instant::now()));
        assert!(timer.is_active());
        assert!(timer.seconds_until_fire() > 1.0);
    }

    #[test]
    fn test_registered_timer_fires_once() {
        let timer = Box::into_raw(Box::new(timer()));
        TIMERS.lock().push(TimerPtr(timer));
        unsafe { (*timer).schedule.lock().fire_at = Some(Instant::now()) };

        let before = HITS.load(Ordering::SeqCst);
        run_due_timers();
        run_due_timers();
        assert_eq!(HITS.load(Ordering::SeqCst), before + 1);

        TIMERS.lock().retain(|registered| registered.0 != timer);
        drop(unsafe { Box::from_raw(timer) });
    }
}
