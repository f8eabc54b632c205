mod common;

use std::collections::HashSet;
use std::convert::Infallible;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use common::{Op, SimBus, SleepDelay};
use embedded_hal_mock::eh1::delay::NoopDelay;
use quad_core::utils::connection::shell::{CommandShell, Outcome, ShellCommand, parse_line};
use quad_core::utils::controllers::esc::{Delay, Esc, MIN_SPEED, Phase, Speed};
use quad_core::utils::controllers::{
    BusError, BusHandle, MotorId, Quadcopter, RegistryError, SharedBus, ValidationError,
};
use quad_core::utils::math::fusion::SensorFusion;
use quad_core::utils::sensors::adxl345::offset_for_mean;
use quad_core::utils::sensors::{Adxl345, Itg3200, SampleTriple, Sensor};

const ESC_ADDRESS: u8 = 0x29;

#[test]
fn test_accel_calibration_cancels_bias() {
    let sim = SimBus::new();
    sim.set_accel_bias(512, 512, 512);
    let mut accel = Adxl345::new(SharedBus::new(sim.clone()), None, None);
    accel.init().unwrap();

    accel.calibrate(100, &mut NoopDelay::new()).unwrap();
    assert_eq!(accel.offsets(), SampleTriple::new(-128, -128, -128));
    assert_eq!(sim.register(0x53, 0x1E) as i8, -128);
    assert_eq!(sim.register(0x53, 0x2D), 0x08);

    let s = accel.read_sample().unwrap();
    for v in [s.x, s.y, s.z] {
        assert!(v.abs() <= 4, "residual {} after calibration", v);
    }
}

#[test]
fn test_accel_recalibration_starts_from_zero() {
    let sim = SimBus::new();
    sim.set_accel_bias(100, -40, 256);
    let mut accel = Adxl345::new(SharedBus::new(sim.clone()), None, None);

    accel.calibrate(10, &mut NoopDelay::new()).unwrap();
    let first = accel.offsets();
    assert_eq!(first, SampleTriple::new(-25, 10, -64));

    // offsets are cleared before sampling, so a second pass lands on the same values
    accel.calibrate(10, &mut NoopDelay::new()).unwrap();
    assert_eq!(accel.offsets(), first);
}

#[test]
fn test_offset_for_mean_targets_zero() {
    assert_eq!(offset_for_mean(0.0), 0);
    assert_eq!(offset_for_mean(512.0), -128);
    assert_eq!(offset_for_mean(-10.0), 3);
    assert_eq!(offset_for_mean(2.0), -1);
    assert_eq!(offset_for_mean(600.0), i8::MIN);
    assert_eq!(offset_for_mean(-1000.0), i8::MAX);
}

#[test]
fn test_gyro_calibration_centers_samples() {
    let sim = SimBus::new();
    for reg in [0x1D, 0x1F, 0x21] {
        sim.set_word(0x68, reg, 1000);
    }
    let mut gyro = Itg3200::new(SharedBus::new(sim.clone()), None, None);

    gyro.calibrate(50, &mut NoopDelay::new()).unwrap();
    assert_eq!(gyro.offsets(), SampleTriple::new(1000, 1000, 1000));

    let s = gyro.read_sample().unwrap();
    assert_eq!(s, SampleTriple::new(0, 0, 0));
    assert_eq!(gyro.to_physical(s.x), 0.0);
}

#[test]
fn test_transactions_do_not_interleave() {
    let sim = SimBus::new();
    let bus = SharedBus::new(sim.clone());
    let mut accel = Adxl345::new(bus.clone(), None, None);
    let mut gyro = Itg3200::new(bus, None, None);

    let a = thread::spawn(move || {
        for _ in 0..200 {
            accel.read_sample().unwrap();
        }
    });
    let g = thread::spawn(move || {
        for _ in 0..200 {
            gyro.read_sample().unwrap();
        }
    });
    a.join().unwrap();
    g.join().unwrap();

    let ops = sim.ops();
    assert_eq!(ops.len(), 400 * 7);
    for chunk in ops.chunks(7) {
        let Op::Select(addr) = chunk[0] else {
            panic!("transaction did not start with a select: {:?}", chunk);
        };
        assert!(
            chunk[1..]
                .iter()
                .all(|op| matches!(op, Op::Read { addr: a, .. } if *a == addr))
        );
    }
}

#[test]
fn test_scan_probes_every_address() {
    let sim = SimBus::new();
    let found = SharedBus::new(sim.clone()).scan();
    assert_eq!(found.first(), Some(&0x03));
    assert_eq!(found.last(), Some(&0x77));
    assert_eq!(found.len(), 0x78 - 0x03);
    // only address-only probes, nothing a motor could take as throttle
    assert!(
        sim.ops()
            .iter()
            .all(|op| matches!(op, Op::Select(_) | Op::Probe(_)))
    );
}

#[test]
fn test_panic_inside_transaction_poisons_bus() {
    let bus = SharedBus::new(SimBus::new());
    let other = bus.clone();
    let crashed = thread::spawn(move || {
        let _ = other.transaction(0x53, |_bus: &mut SimBus| -> Result<(), BusError<Infallible>> {
            panic!("device fault mid-sequence")
        });
    })
    .join();
    assert!(crashed.is_err());
    assert!(matches!(
        bus.transaction(0x53, |b| b.read_register(0x00)),
        Err(BusError::Poisoned)
    ));
}

#[test]
fn test_send_blocks_until_loop_drains() {
    let (mut esc, handle) = Esc::new(SharedBus::new(SimBus::new()), ESC_ADDRESS, None);
    for _ in 0..16 {
        handle.slow_stop();
    }

    let sender = handle.clone();
    let blocked = thread::spawn(move || sender.slow_stop());
    thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());

    let mut delay = NoopDelay::new();
    esc.cycle(&mut delay).unwrap();
    blocked.join().unwrap();
    esc.cycle(&mut delay).unwrap();
    assert!(handle.status().is_settled());
}

#[test]
fn test_speed_and_delay_bounds() {
    assert!(Speed::new(0).is_err());
    assert_eq!(Speed::new(1).unwrap().get(), 1);
    assert_eq!(Speed::new(239).unwrap().get(), 239);
    assert_eq!(Speed::new(240), Err(ValidationError::SpeedOutOfRange(240)));

    assert_eq!(Delay::new(1), Err(ValidationError::DelayOutOfRange(1)));
    assert_eq!(Delay::new(2).unwrap().get(), 2);
    assert_eq!(Delay::new(100).unwrap().get(), 100);
    assert!(Delay::new(101).is_err());
}

#[test]
fn test_motor_id_resolution() {
    assert_eq!(MotorId::from_raw(0).unwrap().address(), 0x29);
    assert_eq!(MotorId::from_raw(3).unwrap().address(), 0x2C);
    assert_eq!(MotorId::from_raw(0x2A).unwrap().index(), 1);
    assert_eq!(MotorId::from_raw(4), Err(ValidationError::UnknownMotor(4)));
    assert!(MotorId::from_raw(0x2D).is_err());
}

#[test]
fn test_slow_stop_ramps_to_zero() {
    let sim = SimBus::new();
    let (mut esc, handle) = Esc::new(
        SharedBus::new(sim.clone()),
        ESC_ADDRESS,
        Some(Delay::new(100).unwrap()),
    );
    let mut delay = NoopDelay::new();

    handle.arm();
    handle.set_speed(Speed::new(37).unwrap());
    esc.cycle(&mut delay).unwrap();
    assert_eq!(esc.speed(), 37);
    assert_eq!(esc.delay(), 100);

    sim.clear_ops();
    handle.slow_stop();
    for _ in 0..8 {
        esc.cycle(&mut delay).unwrap();
    }
    assert_eq!(sim.byte_writes(ESC_ADDRESS), vec![32, 27, 22, 17, 12, 7, 2, 0]);
    assert_eq!(esc.phase(), Phase::Idle);
    assert!(handle.status().is_at_rest());

    // idle keeps refreshing zero throttle
    esc.cycle(&mut delay).unwrap();
    assert_eq!(sim.byte_writes(ESC_ADDRESS).last(), Some(&0));
}

#[test]
fn test_concurrent_updates_are_never_torn() {
    let sim = SimBus::new();
    let (mut esc, handle) = Esc::new(SharedBus::new(sim.clone()), ESC_ADDRESS, None);
    let stop = Arc::new(AtomicBool::new(false));

    let running = Arc::clone(&stop);
    let loop_thread = thread::spawn(move || {
        let mut delay = SleepDelay;
        while !running.load(Ordering::Acquire) {
            esc.cycle(&mut delay).unwrap();
        }
    });

    handle.set_delay(Delay::new(2).unwrap());
    handle.arm();
    let mut staged = HashSet::new();
    let mut last = 0;
    for i in 0..1000u32 {
        let value = 1 + (i * 7) % 239;
        staged.insert(value as u8);
        handle.set_speed(Speed::new(value).unwrap());
        last = value as u8;
    }
    while !handle.status().is_settled() {
        thread::yield_now();
    }
    stop.store(true, Ordering::Release);
    loop_thread.join().unwrap();

    let writes = sim.byte_writes(ESC_ADDRESS);
    assert!(!writes.is_empty());
    for w in &writes {
        assert!(
            *w == 0 || *w == MIN_SPEED || staged.contains(w),
            "unexpected throttle {}",
            w
        );
    }
    assert_eq!(handle.status().speed(), last);
    assert_eq!(writes.last(), Some(&last));
}

#[test]
fn test_registry_rejects_duplicates() {
    let mut quad = Quadcopter::new(SimBus::new());
    let id = MotorId::new(0).unwrap();
    quad.register_motor(id, None, SleepDelay).unwrap();
    assert!(matches!(
        quad.register_motor(id, None, SleepDelay),
        Err(RegistryError::Duplicate(d)) if d == id
    ));
    assert_eq!(quad.running_loops(), 1);
    assert!(quad.registry().contains(id));
}

#[test]
fn test_parse_text_and_json_commands() {
    assert_eq!(parse_line("   ").unwrap(), None);
    assert_eq!(
        parse_line("speed 0x2A 120").unwrap(),
        Some(ShellCommand::Speed { motor: 0x2A, value: 120 })
    );
    assert_eq!(
        parse_line(r#"{"cmd":"delay","motor":1,"value":50}"#).unwrap(),
        Some(ShellCommand::Delay { motor: 1, value: 50 })
    );
    assert_eq!(parse_line("exit").unwrap(), Some(ShellCommand::Exit));
    assert!(parse_line("speed 0").is_err());
    assert!(parse_line("fly 0").is_err());
    assert!(parse_line("speed 0 fast").is_err());
}

#[test]
fn test_shell_rejects_invalid_commands() {
    let mut quad = Quadcopter::new(SimBus::new());
    quad.register_motor(MotorId::new(0).unwrap(), None, SleepDelay)
        .unwrap();
    let mut shell = CommandShell::new(quad.registry(), NoopDelay::new());

    assert_eq!(
        shell.execute(ShellCommand::Start { motor: 2 }),
        Err(ValidationError::UnknownMotor(2))
    );
    assert_eq!(
        shell.execute(ShellCommand::Speed { motor: 0, value: 240 }),
        Err(ValidationError::SpeedOutOfRange(240))
    );
    assert_eq!(
        shell.execute(ShellCommand::Delay { motor: 0, value: 0 }),
        Err(ValidationError::DelayOutOfRange(0))
    );
    let status = quad.registry().get(MotorId::new(0).unwrap()).unwrap().status();
    assert!(status.is_settled());
    assert_eq!(status.phase(), Phase::Uninitialized);
}

#[test]
fn test_shell_session_exits_at_rest() {
    let sim = SimBus::new();
    let mut quad = Quadcopter::new(sim.clone());
    let id = MotorId::new(0).unwrap();
    quad.register_motor(id, None, SleepDelay).unwrap();

    let input = Cursor::new("start 0\nspeed 0 37\nspeed 0 999\ndelay 0 2\n\nexit\nspeed 0 50\n");
    let mut output = Vec::new();
    let outcome = {
        let mut shell = CommandShell::new(quad.registry(), SleepDelay);
        shell.serve(input, &mut output).unwrap()
    };

    assert_eq!(outcome, Outcome::Exit);
    let replies = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = replies.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "ok");
    assert!(lines[2].starts_with("error:"));
    assert_eq!(lines[4], "ok");

    let status = quad.registry().get(id).unwrap().status();
    assert!(status.is_at_rest());
    assert_eq!(sim.byte_writes(ESC_ADDRESS).last(), Some(&0));
}

#[test]
fn test_parse_group_commands() {
    assert_eq!(parse_line("start all").unwrap(), Some(ShellCommand::StartAll));
    assert_eq!(
        parse_line("speed all 80").unwrap(),
        Some(ShellCommand::SpeedAll { value: 80 })
    );
    assert_eq!(
        parse_line("inc -5").unwrap(),
        Some(ShellCommand::Increment { delta: -5 })
    );
    assert_eq!(
        parse_line(r#"{"cmd":"inc","delta":3}"#).unwrap(),
        Some(ShellCommand::Increment { delta: 3 })
    );
    assert_eq!(
        parse_line(r#"{"cmd":"speed_all","value":80}"#).unwrap(),
        Some(ShellCommand::SpeedAll { value: 80 })
    );
    assert!(parse_line("inc up").is_err());
    assert!(parse_line("start every").is_err());
}

#[test]
fn test_shell_drives_all_motors() {
    let sim = SimBus::new();
    let mut quad = Quadcopter::new(sim.clone());
    for index in 0..2 {
        quad.register_motor(MotorId::new(index).unwrap(), None, SleepDelay)
            .unwrap();
    }
    let settle = |quad: &Quadcopter<SimBus>| {
        while !quad.registry().handles().all(|esc| esc.status().is_settled()) {
            thread::sleep(Duration::from_millis(1));
        }
    };
    let speeds = |quad: &Quadcopter<SimBus>| {
        let mut s: Vec<u8> = quad
            .registry()
            .handles()
            .map(|esc| esc.status().speed())
            .collect();
        s.sort();
        s
    };
    let mut shell = CommandShell::new(quad.registry(), SleepDelay);

    assert_eq!(
        shell.execute(ShellCommand::SpeedAll { value: 0 }),
        Err(ValidationError::SpeedOutOfRange(0))
    );
    shell.execute(ShellCommand::StartAll).unwrap();
    settle(&quad);
    assert_eq!(speeds(&quad), vec![MIN_SPEED, MIN_SPEED]);

    shell.execute(ShellCommand::SpeedAll { value: 100 }).unwrap();
    settle(&quad);
    shell.execute(ShellCommand::Increment { delta: 20 }).unwrap();
    settle(&quad);
    assert_eq!(speeds(&quad), vec![120, 120]);

    // one out-of-range target rejects the whole increment
    assert_eq!(
        shell.execute(ShellCommand::Increment { delta: 200 }),
        Err(ValidationError::SpeedOutOfRange(320))
    );
    assert_eq!(
        shell.execute(ShellCommand::Increment { delta: -120 }),
        Err(ValidationError::SpeedOutOfRange(0))
    );
    settle(&quad);
    assert_eq!(speeds(&quad), vec![120, 120]);
    assert_eq!(sim.byte_writes(0x29).last(), Some(&120));
    assert_eq!(sim.byte_writes(0x2A).last(), Some(&120));

    shell.stop_all();
    assert_eq!(speeds(&quad), vec![0, 0]);
}

#[test]
fn test_sensor_fusion_level_airframe() {
    let sim = SimBus::new();
    // 1 g on z at 3.9 mg/LSB
    sim.set_accel_bias(0, 0, 256);
    let quad = Quadcopter::new(sim.clone());
    let mut fusion = SensorFusion::new(quad.accelerometer(None), quad.gyroscope(None));
    fusion.accel_mut().init().unwrap();
    fusion.gyro_mut().init().unwrap();

    let (accel, rates) = fusion.read_sample().unwrap();
    assert!((accel.z - 1.0).abs() < 0.01);
    assert_eq!(rates, SampleTriple::new(0.0, 0.0, 0.0));

    for _ in 0..50 {
        fusion.update(0.01).unwrap();
    }
    let a = fusion.angles();
    assert!(a.x.abs() < 1e-3 && a.y.abs() < 1e-3 && a.z.abs() < 1e-3);
}
