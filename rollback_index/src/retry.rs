// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two retry shapes the rollback code uses.
//!
//! Neither ever loops unbounded, and both let every error other than the one
//! they were asked to handle straight through.

use tpm_lite::{KnownError, TpmError};

/// What a single pass of a `bounded` loop came up with
pub enum Attempt<T> {
    Done(T),
    Retry,
}

/// Runs `f` up to `attempts` times, stopping at the first `Done` or `Err`.
/// Returns `Ok(None)` if every pass asked for a retry.
pub fn bounded<T, E>(
    attempts: usize,
    mut f: impl FnMut() -> Result<Attempt<T>, E>,
) -> Result<Option<T>, E> {
    for _ in 0..attempts {
        if let Attempt::Done(v) = f()? {
            return Ok(Some(v));
        }
    }
    Ok(None)
}

/// Runs `op`. If it fails with `trigger`, runs `recover` and then `op` one
/// more time, returning whatever that second run returns.
pub fn retry_after<C: ?Sized, T>(
    ctx: &mut C,
    trigger: KnownError,
    mut op: impl FnMut(&mut C) -> Result<T, TpmError>,
    recover: impl FnOnce(&mut C) -> Result<(), TpmError>,
) -> Result<T, TpmError> {
    match op(ctx) {
        Err(e) if e.is(trigger) => {
            recover(ctx)?;
            op(ctx)
        }
        r => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_stops_at_done() {
        let mut calls = 0;
        let r: Result<_, ()> = bounded(3, || {
            calls += 1;
            Ok(if calls == 2 {
                Attempt::Done(calls)
            } else {
                Attempt::Retry
            })
        });
        assert_eq!(r, Ok(Some(2)));
        assert_eq!(calls, 2);
    }

    #[test]
    fn bounded_gives_up() {
        let mut calls = 0;
        let r: Result<Option<()>, ()> = bounded(3, || {
            calls += 1;
            Ok(Attempt::Retry)
        });
        assert_eq!(r, Ok(None));
        assert_eq!(calls, 3);
    }

    #[test]
    fn bounded_short_circuits_errors() {
        let mut calls = 0;
        let r: Result<Option<()>, &str> = bounded(3, || {
            calls += 1;
            Err("nope")
        });
        assert_eq!(r, Err("nope"));
        assert_eq!(calls, 1);
    }

    #[derive(Default)]
    struct Counter {
        ops: u32,
        recoveries: u32,
    }

    #[test]
    fn retry_after_recovers_once() {
        let mut c = Counter::default();
        let r = retry_after(
            &mut c,
            KnownError::MaxNvWrites,
            |c| {
                c.ops += 1;
                if c.ops == 1 {
                    Err(KnownError::MaxNvWrites.into())
                } else {
                    Ok(())
                }
            },
            |c| {
                c.recoveries += 1;
                Ok(())
            },
        );
        assert!(r.is_ok());
        assert_eq!((c.ops, c.recoveries), (2, 1));
    }

    #[test]
    fn retry_after_returns_second_failure() {
        let mut c = Counter::default();
        let r: Result<(), _> = retry_after(
            &mut c,
            KnownError::MaxNvWrites,
            |c| {
                c.ops += 1;
                Err(KnownError::MaxNvWrites.into())
            },
            |c| {
                c.recoveries += 1;
                Ok(())
            },
        );
        assert_eq!(r, Err(TpmError::Known(KnownError::MaxNvWrites)));
        assert_eq!((c.ops, c.recoveries), (2, 1));
    }

    #[test]
    fn retry_after_ignores_other_errors() {
        let mut c = Counter::default();
        let r: Result<(), _> = retry_after(
            &mut c,
            KnownError::MaxNvWrites,
            |c| {
                c.ops += 1;
                Err(KnownError::IoError.into())
            },
            |c| {
                c.recoveries += 1;
                Ok(())
            },
        );
        assert_eq!(r, Err(TpmError::Known(KnownError::IoError)));
        assert_eq!((c.ops, c.recoveries), (1, 0));
    }

    #[test]
    fn retry_after_propagates_recovery_failure() {
        let mut c = Counter::default();
        let r: Result<(), _> = retry_after(
            &mut c,
            KnownError::MaxNvWrites,
            |c| {
                c.ops += 1;
                Err(KnownError::MaxNvWrites.into())
            },
            |_| Err(KnownError::BadPresence.into()),
        );
        assert_eq!(r, Err(TpmError::Known(KnownError::BadPresence)));
        assert_eq!(c.ops, 1);
    }
}
