//! End-to-end session tests: scripted client traffic against scripted
//! instrument links, through the real scheduler, dispatcher, and device
//! protocol layers.

use kiln_common::config::ControlConfig;
use kiln_devices::frame::ACK_RECEIVED;
use kiln_devices::mock::MockTransport;
use kiln_devices::probe::TempProbe;
use kiln_devices::supply::PowerSupply;
use kiln_server::scheduler::{CommandPort, PortRead, Regulator, SessionEnd};
use kiln_server::state::ControlState;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;

/// Scripted client: one event per poll, hangs up once the script ends.
#[derive(Default)]
struct ScriptedClient {
    events: VecDeque<Option<Vec<u8>>>,
    replies: Vec<String>,
}

impl ScriptedClient {
    fn send(&mut self, line: &str) {
        self.events.push_back(Some(line.as_bytes().to_vec()));
    }

    fn wait(&mut self) {
        self.events.push_back(None);
    }
}

impl CommandPort for ScriptedClient {
    fn poll(&mut self, buf: &mut [u8]) -> std::io::Result<PortRead> {
        match self.events.pop_front() {
            None => Ok(PortRead::Closed),
            Some(None) => Ok(PortRead::Idle),
            Some(Some(chunk)) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(PortRead::Bytes(chunk.len()))
            }
        }
    }

    fn reply(&mut self, line: &str) -> std::io::Result<()> {
        self.replies.push(line.to_string());
        Ok(())
    }
}

fn section(sign: i8, digits: u32, exponent: u8) -> [u8; 6] {
    let mut flags = exponent & 0x07;
    if sign < 0 {
        flags |= 0x08;
    }
    let d = digits.to_be_bytes();
    [0x00, flags, d[0], d[1], d[2], d[3]]
}

/// One acknowledged 30-byte stream reply: index counter, probe
/// temperature, three auxiliary channels.
fn queue_sample(link: &MockTransport, temperature: [u8; 6]) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&section(1, 3, 0));
    payload.extend_from_slice(&temperature);
    payload.extend_from_slice(&section(-1, 10_000, 0));
    payload.extend_from_slice(&section(1, 0, 0));
    payload.extend_from_slice(&section(1, 29_815, 2));
    link.push_reply(&payload);
    link.push_reply(&[ACK_RECEIVED]);
}

fn assembly() -> (
    Regulator<MockTransport, MockTransport>,
    MockTransport,
    MockTransport,
) {
    let supply_link = MockTransport::new();
    let probe_link = MockTransport::new();
    let state = ControlState::from_config(&ControlConfig {
        set_point: 30.0,
        sample_period_s: 2.0,
        kp: 1.0,
        ki: 0.0,
        kd: 0.0,
        out_max: 30.0,
    });
    let regulator = Regulator::new(
        state,
        PowerSupply::new(supply_link.clone(), 1, 32.0, 3.3),
        TempProbe::new(probe_link.clone(), 5),
    );
    (regulator, supply_link, probe_link)
}

#[test]
fn temperature_query_end_to_end() {
    let (mut regulator, _supply, probe_link) = assembly();
    queue_sample(&probe_link, section(1, 215, 1)); // 21.5 °C

    let mut client = ScriptedClient::default();
    client.send("DQ:TEMP\r");

    let running = AtomicBool::new(true);
    let end = regulator.run_session(&mut client, &running).unwrap();

    assert_eq!(end, SessionEnd::Disconnected);
    assert_eq!(client.replies, vec!["21.5".to_string()]);
}

#[test]
fn negative_fixed_point_reading_crosses_the_wire() {
    let (mut regulator, _supply, probe_link) = assembly();
    // Section bytes 00 08 00 00 27 10: sign bit set, exponent 0,
    // digits 0x2710 = 10000, so the reading is -10000.
    queue_sample(&probe_link, [0x00, 0x08, 0x00, 0x00, 0x27, 0x10]);

    let mut client = ScriptedClient::default();
    client.send("DQ:TEMP\r");

    let running = AtomicBool::new(true);
    regulator.run_session(&mut client, &running).unwrap();

    assert_eq!(client.replies, vec!["-10000".to_string()]);
}

#[test]
fn arm_regulate_disarm_scenario() {
    let (mut regulator, supply_link, probe_link) = assembly();
    queue_sample(&probe_link, section(1, 215, 1)); // 21.5 °C, error 8.5

    let mut client = ScriptedClient::default();
    client.send("PD:REGT 1\r"); // pass 1: arm (configures the supply)
    client.wait(); // pass 2: the control step runs
    client.send("PD:REGT 0\r"); // pass 3: disarm
    client.wait(); // pass 4: idle tick forces zero

    let running = AtomicBool::new(true);
    let end = regulator.run_session(&mut client, &running).unwrap();
    assert_eq!(end, SessionEnd::Disconnected);

    // Arming zeroed the supply and enabled the output, the step drove the
    // heater, disarming forced the command back to zero.
    let sent = supply_link.sent_text();
    assert!(sent.contains("Output CH1,ON\n"), "{sent}");
    assert!(sent.contains("CH1:voltage 8.5\n"), "{sent}");
    assert!(sent.ends_with("CH1:voltage 0\n"), "{sent}");

    assert_eq!(regulator.stats.steps, 1);
    assert_eq!(regulator.stats.commands, 2);
    assert_eq!(regulator.state.actuator_command, 0.0);
    assert!((regulator.state.last_temperature - 21.5).abs() < 1e-12);
}

#[test]
fn probe_outage_reported_and_session_survives() {
    let (mut regulator, _supply, _probe_link) = assembly();
    // The probe link never answers: the query exhausts its retry cap.

    let mut client = ScriptedClient::default();
    client.send("DQ:TEMP\r");
    client.send("PD:SETP ?\r");

    let running = AtomicBool::new(true);
    regulator.run_session(&mut client, &running).unwrap();

    assert_eq!(client.replies.len(), 2);
    assert!(client.replies[0].starts_with("ERROR: "), "{}", client.replies[0]);
    assert_eq!(client.replies[1], "30");
}
