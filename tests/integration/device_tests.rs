//! Full device wiring: configured ticker periods and the stored name.

use blerpc::app::device::Device;
use blerpc::app::service::{NAME_KEY, NAME_NAMESPACE};
use blerpc::config::TransportConfig;
use blerpc::rpc::auth_store::{AUTH_NAMESPACE, CLIENTS_KEY};
use blerpc::rpc::server::Channel;

use super::client::request;
use super::mock_kv::{ManualClock, MockKv};

#[test]
fn auth_tables_flush_at_auth_period() {
    let kv = MockKv::new();
    let clock = ManualClock::default();
    let mut device = Device::new(TransportConfig::default(), kv.clone(), clock.clone()).unwrap();
    let period = device.server.config().auth_persist_period_ms;
    assert_eq!(period, 500);

    device.server.auth_store_mut().create(&[9; 16], &[1; 32]);

    clock.set(period - 1);
    assert!(!device.auth_writer.tick());
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, CLIENTS_KEY), 0);

    clock.set(period);
    assert!(device.auth_writer.tick());
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, CLIENTS_KEY), 1);
}

#[test]
fn renamed_device_advertises_new_name_after_restart() {
    let kv = MockKv::new();
    let clock = ManualClock::default();
    {
        let mut device =
            Device::new(TransportConfig::default(), kv.clone(), clock.clone()).unwrap();
        device.server.on_connect(1).unwrap();
        assert_eq!(
            request(
                &mut device.server,
                1,
                Channel::Rpc,
                1,
                r#"{"method":"set_name","args":["Reflow Table Workshop North"]}"#
            ),
            r#"{"ok":true,"result":true}"#
        );

        clock.set(199);
        assert!(!device.prefs_writer.tick());
        assert_eq!(kv.writes_to(NAME_NAMESPACE, NAME_KEY), 0);
        clock.set(200);
        assert!(device.prefs_writer.tick());
        assert_eq!(kv.writes_to(NAME_NAMESPACE, NAME_KEY), 1);
    }

    let device = Device::new(TransportConfig::default(), kv, clock).unwrap();
    assert_eq!(
        device.server.config().device_name.as_str(),
        "Reflow Table Workshop North"
    );
    assert_eq!(device.server.config().advertised_name(), "Reflow Table Worksho");
}
