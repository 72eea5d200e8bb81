mod common;
use common::*;

use std::sync::atomic::Ordering;

#[test]
fn crc_vectors() {
    assert_eq!(powermon::crc::pi30(b"QPIGS"), [0xb7, 0xa9]);
    assert_eq!(powermon::crc::pi30(b"QPIRI"), [0xf8, 0x54]);
    assert_eq!(powermon::crc::pi30(b"PSDV56.4"), [0xf9, 0xe0]);
    assert_eq!(powermon::crc::pi30(b"QPIGS"), powermon::crc::pi30(b"QPIGS"));
}

#[test]
fn pi18_frames() -> Result<()> {
    let protocol = Protocol::new(ProtocolId::Pi18, None)?;
    // length counts the code, the two CRC bytes and the CR
    assert_eq!(protocol.get_full_command("PI")?, b"^P005PIq\x8b\r");
    assert_eq!(protocol.get_full_command("PEA")?, b"^S006PEA\xbb`\r");
    assert_eq!(protocol.get_full_command("EY2023")?, b"^P009EY2023\x91=\r");

    let frame = protocol.get_full_command("PI")?;
    let (head, crc) = frame.split_at(frame.len() - 3);
    assert_eq!(&crc[..2], &powermon::crc::pi30(head));
    Ok(())
}

#[test]
fn tampered_response_fails_crc() -> Result<()> {
    let protocol = Protocol::new(ProtocolId::Pi30, None)?;
    let command = protocol.resolve("QDI")?;
    let fixture = command.definition.test_responses[0];
    assert!(protocol.decode(&command, fixture).is_valid);

    for i in 0..fixture.len() - 3 {
        let mut tampered = fixture.to_vec();
        tampered[i] ^= 0x01;

        let result = protocol.decode(&command, &tampered);
        assert!(!result.is_valid, "byte {}", i);
        assert!(result.readings.is_empty());
        assert!(
            result.error_messages[0].starts_with("CRC mismatch, got 9e60 calculated "),
            "{}",
            result.error_messages[0]
        );
    }
    Ok(())
}

#[tokio::test]
async fn qdi_default_settings() -> Result<()> {
    common_setup();
    let mut dispatcher = test_dispatcher(ProtocolId::Pi30, 0)?;

    let result = dispatcher.run_command("QDI").await;
    assert!(!result.error, "{:?}", result.error_messages);

    let lines = format(FormatKind::Simple, &result)?;
    assert_eq!(
        &lines[..3],
        &[
            "ac_output_voltage=230.0V",
            "ac_output_frequency=50.0Hz",
            "max_ac_charging_current=30A"
        ]
    );

    // decoding the same bytes again gives the same readings
    let again = dispatcher.run_command("QDI").await;
    assert_eq!(again.readings, result.readings);
    Ok(())
}

#[tokio::test]
async fn qflag_enflags() -> Result<()> {
    common_setup();
    let mut dispatcher = test_dispatcher(ProtocolId::Pi30, 0)?;
    let result = dispatcher.run_command("QFLAG").await;

    // lcd_reset_to_default ('k') comes before the 'D' marker in EakxyDbjuvz
    for slug in [
        "buzzer",
        "lcd_reset_to_default",
        "lcd_backlight",
        "primary_source_interrupt_alarm",
    ] {
        assert_eq!(value_of(&result, slug).as_deref(), Some("enabled"), "{}", slug);
    }
    for slug in [
        "overload_bypass",
        "power_saving",
        "overload_restart",
        "over_temperature_restart",
        "record_fault_code",
    ] {
        assert_eq!(value_of(&result, slug).as_deref(), Some("disabled"), "{}", slug);
    }
    Ok(())
}

#[tokio::test]
async fn setter_acknowledgement() -> Result<()> {
    common_setup();
    // fixture 0 is the NAK, fixture 1 the ACK
    let result = test_dispatcher(ProtocolId::Pi30, 1)?.run_command("PBT00").await;
    assert_eq!(value_of(&result, "command_execution").as_deref(), Some("Successful"));

    let result = test_dispatcher(ProtocolId::Pi30, 0)?.run_command("PBT01").await;
    assert_eq!(value_of(&result, "command_execution").as_deref(), Some("Failed"));
    Ok(())
}

#[test]
fn regex_families() -> Result<()> {
    let protocol = Protocol::new(ProtocolId::Pi30, None)?;
    for i in 0..10 {
        let command = protocol.resolve(&format!("QPGS{}", i))?;
        assert_eq!(command.definition.code, "QPGS");
        assert_eq!(command.parameter, Some(i.to_string()));
    }
    for code in ["PBT00", "PBT01", "PBT02"] {
        assert_eq!(protocol.resolve(code)?.definition.code, "PBT");
    }
    assert_eq!(
        protocol.resolve("PBT03").err(),
        Some(DecodeError::UnknownCommand("PBT03".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn unknown_command_does_no_io() -> Result<()> {
    common_setup();
    let port = TestPort::new(0);
    let calls = port.calls();
    let mut dispatcher = Dispatcher::new("test", Protocol::new(ProtocolId::Pi30, None)?, Box::new(port));

    let result = dispatcher.run_command("NOTREAL").await;
    assert!(result.error);
    assert_eq!(
        format(FormatKind::Simple, &result)?,
        vec!["Error Count: 1", "Error #0: Unknown command: NOTREAL"]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}
