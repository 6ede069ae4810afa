//! AirspyHF+ command set.
//!
//! | command | scope | arguments | results |
//! |---|---|---|---|
//! | `lib_version` | global | | major, minor, revision |
//! | `list_devices` | global | | [serials] |
//! | `open` | global | | serial |
//! | `open_sn` | global | serial | |
//! | `close` | global | serial | |
//! | `start` / `stop` | device | | |
//! | `is_streaming` | device | | bool |
//! | `set_freq` | device | Hz (u64) | |
//! | `set_lib_dsp` | device | bool | |
//! | `get_samplerates` | device | | [rates] |
//! | `set_samplerate` | device | u32 | |
//! | `get_calibration` | device | | ppb |
//! | `set_calibration` | device | ppb (i32) | |
//! | `set_optimal_iq_correction_point` | device | f32 | |
//! | `iq_balancer_configure` | device | 4 x i32 | |
//! | `flash_calibration` | device | | |
//! | `board_partid_serialno_read` | device | | part_id, [serial words] |
//! | `version_string_read` | device | | string |
//! | `set_user_output` | device | pin, value (u8) | |
//! | `set_hf_agc` / `set_hf_agc_threshold` / `set_hf_att` | device | u8 | |
//!
//! Device-scoped arguments follow the serial. Closing or flashing a device that
//! is streaming is refused before the native call.

use std::sync::Arc;

use super::dispatcher::{CommandTable, DeviceCall, DispatchContext};
use super::CommandError;

const STREAMING_ACTIVE: &str = "Streaming is active. Please stop streaming and try again.";

/// Builds the full AirspyHF+ command table.
pub fn airspy_commands() -> CommandTable {
    CommandTable::new()
        .global("lib_version", |ctx: &mut DispatchContext, (): ()| {
            Ok(ctx.registry().driver().lib_version())
        })
        .global("list_devices", |ctx: &mut DispatchContext, (): ()| {
            Ok(ctx.registry().driver().list_devices()?)
        })
        .global("open", |ctx: &mut DispatchContext, (): ()| {
            Ok(ctx.registry().open(None)?)
        })
        .global("open_sn", |ctx: &mut DispatchContext, (serial,): (u64,)| {
            ctx.registry().open(Some(serial))?;
            Ok(())
        })
        .global("close", |ctx: &mut DispatchContext, (serial,): (u64,)| {
            let registry = ctx.registry();
            let device = registry
                .lookup(serial)
                .map_err(|_| CommandError::DeviceNotFound(serial))?;
            if device.is_streaming() {
                return Err(CommandError::InvalidPrecondition(STREAMING_ACTIVE.into()));
            }
            registry.close(serial)?;
            Ok(())
        })
        .device("start", |call: &mut DeviceCall<'_>, (): ()| {
            Ok(call.device.start(Arc::clone(call.on_samples))?)
        })
        .device("stop", |call: &mut DeviceCall<'_>, (): ()| Ok(call.device.stop()?))
        .device("is_streaming", |call: &mut DeviceCall<'_>, (): ()| {
            Ok(call.device.is_streaming())
        })
        .device("set_freq", |call: &mut DeviceCall<'_>, (freq_hz,): (u64,)| {
            Ok(call.device.set_freq(freq_hz)?)
        })
        .device("set_lib_dsp", |call: &mut DeviceCall<'_>, (enabled,): (bool,)| {
            Ok(call.device.set_lib_dsp(enabled)?)
        })
        .device("get_samplerates", |call: &mut DeviceCall<'_>, (): ()| {
            Ok(call.device.get_samplerates()?)
        })
        .device("set_samplerate", |call: &mut DeviceCall<'_>, (rate,): (u32,)| {
            Ok(call.device.set_samplerate(rate)?)
        })
        .device("get_calibration", |call: &mut DeviceCall<'_>, (): ()| {
            Ok(call.device.get_calibration()?)
        })
        .device("set_calibration", |call: &mut DeviceCall<'_>, (ppb,): (i32,)| {
            Ok(call.device.set_calibration(ppb)?)
        })
        .device("set_optimal_iq_correction_point", |call: &mut DeviceCall<'_>, (w,): (f32,)| {
            Ok(call.device.set_optimal_iq_correction_point(w)?)
        })
        .device(
            "iq_balancer_configure",
            |call: &mut DeviceCall<'_>, args: (i32, i32, i32, i32)| {
                let (skip, integration, overlap, correlation) = args;
                Ok(call
                    .device
                    .iq_balancer_configure(skip, integration, overlap, correlation)?)
            },
        )
        .device("flash_calibration", |call: &mut DeviceCall<'_>, (): ()| {
            if call.device.is_streaming() {
                return Err(CommandError::InvalidPrecondition(STREAMING_ACTIVE.into()));
            }
            Ok(call.device.flash_calibration()?)
        })
        .device("board_partid_serialno_read", |call: &mut DeviceCall<'_>, (): ()| {
            Ok(call.device.board_partid_serialno_read()?)
        })
        .device("version_string_read", |call: &mut DeviceCall<'_>, (): ()| {
            Ok(call.device.version_string_read()?)
        })
        .device("set_user_output", |call: &mut DeviceCall<'_>, (pin, value): (u8, u8)| {
            Ok(call.device.set_user_output(pin, value)?)
        })
        .device("set_hf_agc", |call: &mut DeviceCall<'_>, (flag,): (u8,)| {
            Ok(call.device.set_hf_agc(flag)?)
        })
        .device("set_hf_agc_threshold", |call: &mut DeviceCall<'_>, (flag,): (u8,)| {
            Ok(call.device.set_hf_agc_threshold(flag)?)
        })
        .device("set_hf_att", |call: &mut DeviceCall<'_>, (att,): (u8,)| {
            Ok(call.device.set_hf_att(att)?)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandDispatcher, CommandResponse, Scope};
    use crate::hardware::{DeviceRegistry, MockAirspy, SampleTransfer};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    const SERIAL: u64 = 1234;

    fn setup() -> (Arc<CommandDispatcher>, MockAirspy) {
        let driver = MockAirspy::with_devices(&[SERIAL]);
        let registry = DeviceRegistry::new(Arc::new(driver.clone()));
        let context = DispatchContext::new(registry, Arc::new(|_: SampleTransfer| {}));
        let dispatcher = CommandDispatcher::new(
            "AIRSPYCMDS",
            airspy_commands(),
            context,
            Arc::new(MemoryStore::new()),
        );
        (dispatcher, driver)
    }

    fn run(dispatcher: &CommandDispatcher, command: &str, args: Value) -> Value {
        let args = args.as_array().cloned().unwrap_or_default();
        dispatcher.execute(command, &args).unwrap().to_value()
    }

    #[test]
    fn table_covers_the_command_set() {
        let table = airspy_commands();
        assert_eq!(table.len(), 23);
        for global in ["lib_version", "list_devices", "open", "open_sn", "close"] {
            assert_eq!(table.scope(global), Some(Scope::Global), "{global}");
        }
        assert_eq!(table.scope("set_hf_att"), Some(Scope::Device));
    }

    #[test]
    fn library_commands() {
        let (dispatcher, _) = setup();
        assert_eq!(run(&dispatcher, "lib_version", json!([])), json!(["SUCCESS", 1, 6, 8]));
        assert_eq!(
            run(&dispatcher, "list_devices", json!([])),
            json!(["SUCCESS", [SERIAL]])
        );
        assert_eq!(run(&dispatcher, "open", json!([])), json!(["SUCCESS", SERIAL]));
        assert_eq!(
            run(&dispatcher, "close", json!([SERIAL])),
            json!(["SUCCESS", SERIAL])
        );
    }

    #[test]
    fn double_open_and_unknown_close() {
        let (dispatcher, _) = setup();
        assert_eq!(run(&dispatcher, "open_sn", json!([SERIAL])), json!(["SUCCESS", SERIAL]));
        assert_eq!(
            run(&dispatcher, "open_sn", json!([SERIAL])),
            json!(["ERROR", "already open", SERIAL])
        );
        assert_eq!(
            run(&dispatcher, "close", json!([77])),
            json!(["ERROR", "device not found", 77])
        );
    }

    #[test]
    fn close_refused_while_streaming() {
        let (dispatcher, driver) = setup();
        run(&dispatcher, "open_sn", json!([SERIAL]));
        assert_eq!(run(&dispatcher, "start", json!([SERIAL])), json!(["SUCCESS", SERIAL]));
        assert_eq!(
            run(&dispatcher, "close", json!([SERIAL])),
            json!(["ERROR", "invalid precondition", STREAMING_ACTIVE])
        );
        assert_eq!(driver.call_count("close"), 0);

        run(&dispatcher, "stop", json!([SERIAL]));
        assert_eq!(run(&dispatcher, "close", json!([SERIAL])), json!(["SUCCESS", SERIAL]));
    }

    #[test]
    fn flash_refused_while_streaming() {
        let (dispatcher, driver) = setup();
        run(&dispatcher, "open_sn", json!([SERIAL]));
        run(&dispatcher, "start", json!([SERIAL]));
        assert_eq!(
            run(&dispatcher, "flash_calibration", json!([SERIAL])),
            json!(["ERROR", "invalid precondition", STREAMING_ACTIVE])
        );
        assert_eq!(driver.call_count("flash_calibration"), 0);

        run(&dispatcher, "stop", json!([SERIAL]));
        assert_eq!(
            run(&dispatcher, "flash_calibration", json!([SERIAL])),
            json!(["SUCCESS", SERIAL])
        );
        assert_eq!(driver.call_count("flash_calibration"), 1);
    }

    #[test]
    fn device_settings_echo_arguments() {
        let (dispatcher, driver) = setup();
        run(&dispatcher, "open_sn", json!([SERIAL]));
        assert_eq!(
            run(&dispatcher, "set_freq", json!([SERIAL, 145_000_000])),
            json!(["SUCCESS", SERIAL, 145_000_000])
        );
        assert_eq!(
            run(&dispatcher, "iq_balancer_configure", json!([SERIAL, 1, 2, 3, 4])),
            json!(["SUCCESS", SERIAL, 1, 2, 3, 4])
        );
        assert_eq!(
            run(&dispatcher, "set_user_output", json!([SERIAL, 1, 1])),
            json!(["SUCCESS", SERIAL, 1, 1])
        );
        assert_eq!(
            run(&dispatcher, "get_calibration", json!([SERIAL])),
            json!(["SUCCESS", SERIAL, 0])
        );
        assert_eq!(
            run(&dispatcher, "version_string_read", json!([SERIAL])),
            json!(["SUCCESS", SERIAL, "R3.0.7-CD"])
        );
        assert_eq!(
            run(&dispatcher, "is_streaming", json!([SERIAL])),
            json!(["SUCCESS", SERIAL, false])
        );

        let state = driver.device(SERIAL).unwrap();
        assert_eq!(state.freq_hz, 145_000_000);
        assert_eq!(state.iq_balancer, [1, 2, 3, 4]);
    }

    #[test]
    fn native_failures_carry_status() {
        let (dispatcher, driver) = setup();
        run(&dispatcher, "open_sn", json!([SERIAL]));
        driver.fail_operation("set_hf_agc", -3);
        assert_eq!(
            run(&dispatcher, "set_hf_agc", json!([SERIAL, 1])),
            json!(["ERROR", "hardware operation failed", "set_hf_agc", -3])
        );

        driver.fault_operation("get_samplerates", "usb stall");
        assert_eq!(
            run(&dispatcher, "get_samplerates", json!([SERIAL])),
            json!(["ERROR", "runtime fault", "usb stall"])
        );

        driver.panic_operation("set_hf_att", "driver crashed");
        assert_eq!(
            run(&dispatcher, "set_hf_att", json!([SERIAL, 2])),
            json!(["ERROR", "runtime fault", "driver crashed"])
        );
    }

    #[test]
    fn unopened_serial_is_not_found() {
        let (dispatcher, driver) = setup();
        let response = dispatcher.execute("set_freq", &[json!(SERIAL), json!(1)]).unwrap();
        assert_eq!(response, CommandResponse::Failure(CommandError::DeviceNotFound(SERIAL)));
        assert_eq!(driver.call_count("set_freq"), 0);
    }
}
