//! Reusable oracles.

use linkd_core::{ExitCode, Phase};

use crate::scenario::OracleFn;

/// Every oracle must pass. Stops at the first failure.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| oracles.iter().try_for_each(|oracle| oracle(world)))
}

/// Session exited with `expected`.
pub fn exit_code(expected: ExitCode) -> OracleFn {
    Box::new(move |world| {
        if world.exit_code() == expected {
            Ok(())
        } else {
            Err(format!("{}: expected exit {expected}, got {}", world.name(), world.exit_code()))
        }
    })
}

/// Session entered `phase` at least once.
pub fn visited(phase: Phase) -> OracleFn {
    Box::new(move |world| {
        if world.visited(phase) {
            Ok(())
        } else {
            Err(format!("{}: never entered {phase}; phases were {:?}", world.name(), world.phases()))
        }
    })
}

/// Session never entered `phase`.
pub fn never_visited(phase: Phase) -> OracleFn {
    Box::new(move |world| {
        if world.visited(phase) {
            Err(format!("{}: unexpectedly entered {phase}", world.name()))
        } else {
            Ok(())
        }
    })
}

/// Session sent a Protocol-Reject for `protocol`.
pub fn rejected(protocol: u16) -> OracleFn {
    Box::new(move |world| {
        if world.protocol_rejects().contains(&protocol) {
            Ok(())
        } else {
            Err(format!("{}: no Protocol-Reject for 0x{protocol:04x}", world.name()))
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use linkd_core::ScriptEnv;

    use super::*;
    use crate::scenario::World;

    fn world(exit: ExitCode, phases: Vec<Phase>) -> World {
        World {
            name: "unit".into(),
            phases,
            notifications: Vec::new(),
            sent: Vec::new(),
            exit,
            unsuccess: 0,
            attempts: 1,
            iterations: 0,
            phase_before_shutdown: Phase::Dead,
            elapsed: Duration::ZERO,
            script_env: ScriptEnv::new(),
        }
    }

    #[test]
    fn all_of_reports_first_failure() {
        let oracle = all_of(vec![exit_code(ExitCode::Ok), visited(Phase::Running)]);

        let err = oracle(&world(ExitCode::Ok, vec![Phase::Establish])).unwrap_err();
        assert!(err.contains("running"), "{err}");

        assert!(oracle(&world(ExitCode::Ok, vec![Phase::Running])).is_ok());
    }

    #[test]
    fn never_visited_fails_on_entry() {
        let oracle = never_visited(Phase::Holdoff);
        assert!(oracle(&world(ExitCode::Hangup, vec![Phase::Holdoff])).is_err());
        assert!(oracle(&world(ExitCode::Hangup, vec![Phase::Dead])).is_ok());
    }
}
