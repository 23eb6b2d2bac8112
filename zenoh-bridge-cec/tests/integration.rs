//! End-to-end tests: simulated bus in, recording sink out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cecsight_bridge_framework::testing::RecordingSink;
use cecsight_bridge_framework::{Sink, TopicBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use zenoh_bridge_cec::bridge::PowerState;
use zenoh_bridge_cec::cec::{
    CecBus, CecCommand, CecMessage, LogicalAddress, Opcode, PhysicalAddress, PowerStatus,
    SimulatedBus, SimulatedDevice, VendorId,
};
use zenoh_bridge_cec::config::CecConfig;
use zenoh_bridge_cec::device::{DEVICE_STORE_FILE, Device, DeviceId, DeviceRecord, DeviceStore};
use zenoh_bridge_cec::discovery::DiscoverySettings;
use zenoh_bridge_cec::monitor::MonitorConfig;
use zenoh_bridge_cec::{CecBridge, Settings};

const PLAYER: LogicalAddress = LogicalAddress::PLAYBACK_1;
const STREAMER: LogicalAddress = LogicalAddress::PLAYBACK_2;

struct Harness {
    bus: Arc<SimulatedBus>,
    sink: Arc<RecordingSink>,
    bridge: Arc<CecBridge>,
    messages: Option<mpsc::UnboundedReceiver<CecMessage>>,
    cancel: CancellationToken,
}

fn settings() -> Settings {
    Settings {
        topics: TopicBuilder::new("cecsight/cec"),
        retain_state: false,
        active_source: MonitorConfig::new(
            Duration::from_secs(600),
            Duration::from_secs(10),
            Duration::from_secs(60),
        ),
        power: MonitorConfig::new(
            Duration::from_secs(300),
            Duration::from_secs(5),
            Duration::from_secs(60),
        ),
        hub_birth: None,
        discovery: None,
    }
}

fn living_room(player_power: PowerStatus) -> Arc<SimulatedBus> {
    let bus = SimulatedBus::with_devices(
        LogicalAddress::RECORDING_1,
        [
            SimulatedDevice::new(
                LogicalAddress::TV,
                PhysicalAddress::ROOT,
                VendorId::new(0x0000F0),
                "TV",
            ),
            SimulatedDevice::new(
                PLAYER,
                PhysicalAddress::new(0x1000),
                VendorId::new(0x080046),
                "Player",
            )
            .with_power(player_power),
            SimulatedDevice::new(
                STREAMER,
                PhysicalAddress::new(0x2000),
                VendorId::new(0x001A11),
                "Chromecast",
            ),
        ],
        Some(PLAYER),
    )
    .unwrap();
    Arc::new(bus)
}

impl Harness {
    fn new(bus: Arc<SimulatedBus>, store: DeviceStore, settings: Settings) -> Self {
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();
        let messages = bus.take_messages();
        let bridge = CecBridge::build(
            bus.clone() as Arc<dyn CecBus>,
            sink.clone() as Arc<dyn Sink>,
            store,
            settings,
            &cancel,
        );
        Self {
            bus,
            sink,
            bridge: Arc::new(bridge),
            messages,
            cancel,
        }
    }

    fn start_pump(&mut self) {
        let messages = self.messages.take().unwrap();
        tokio::spawn(self.bridge.clone().pump(messages, self.cancel.clone()));
    }

    fn device(&self, address: LogicalAddress) -> Device {
        self.bridge.registry().find_by_address(address).unwrap()
    }

    fn dispatch(&self, message: CecMessage) {
        self.bridge.dispatch(&message);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn state(name: &str, property: &str) -> String {
    format!("cecsight/cec/{}/{}", name, property)
}

fn power_report(from: LogicalAddress, status: u8) -> CecMessage {
    CecMessage::new(from, LogicalAddress::TV, Opcode::ReportPowerStatus, vec![status])
}

/// Let spawned monitor and pump tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Run past every monitor's burst so only idle polls remain.
async fn go_idle() {
    tokio::time::sleep(Duration::from_secs(61)).await;
}

/// Destinations of the power status requests sent so far, sorted.
fn power_requests(bus: &SimulatedBus) -> Vec<LogicalAddress> {
    let mut requests: Vec<LogicalAddress> = bus
        .transmitted()
        .into_iter()
        .filter(|c| c.opcode == Opcode::GiveDevicePowerStatus)
        .map(|c| c.destination)
        .collect();
    requests.sort();
    requests
}

#[tokio::test(start_paused = true)]
async fn test_standby_of_active_source_then_new_source() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    assert_eq!(h.bridge.scan(), 3);
    settle().await;

    let player = h.device(PLAYER);
    assert_eq!(h.bridge.active_source().current(), Some(player.clone()));
    h.sink.clear();

    // The bus already points at the streamer, but nothing has polled yet.
    h.bus.set_active_source(Some(STREAMER));
    h.dispatch(power_report(PLAYER, PowerStatus::Standby.as_byte()));

    assert_eq!(h.sink.texts(&state("Player", "is_active_source")), vec!["off"]);
    assert_eq!(h.sink.count(&state("Chromecast", "is_active_source")), 0);
    assert_eq!(h.bridge.active_source().current(), None);
    assert_eq!(h.bridge.active_source().is_allowed(&player.id), Some(false));

    // The report reset the monitor; its poll now finds the streamer.
    settle().await;
    assert_eq!(
        h.sink.texts(&state("Chromecast", "is_active_source")),
        vec!["on"]
    );
    assert_eq!(h.sink.texts(&state("Player", "is_active_source")), vec!["off"]);
    assert_eq!(h.bridge.active_source().current(), Some(h.device(STREAMER)));
}

#[tokio::test]
async fn test_disallowed_source_only_accepted_without_current() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    let active = h.bridge.active_source();
    let player = h.device(PLAYER);
    let streamer = h.device(STREAMER);

    h.dispatch(power_report(PLAYER, PowerStatus::Standby.as_byte()));
    assert_eq!(active.is_allowed(&player.id), Some(false));

    // No current source: a stale guess beats none.
    active.set_active_source(Some(player.clone()));
    assert_eq!(active.current(), Some(player.clone()));

    active.set_active_source(Some(streamer.clone()));
    assert_eq!(active.current(), Some(streamer.clone()));

    // With a current source, the sleeping player cannot take over.
    h.sink.clear();
    active.set_active_source(Some(player.clone()));
    assert_eq!(active.current(), Some(streamer.clone()));
    assert!(h.sink.published().is_empty());

    // Once it reports on again it may.
    h.dispatch(power_report(PLAYER, PowerStatus::On.as_byte()));
    active.set_active_source(Some(player));
    assert_eq!(h.sink.texts(&state("Chromecast", "is_active_source")), vec!["off"]);
    assert_eq!(h.sink.texts(&state("Player", "is_active_source")), vec!["on"]);
}

#[tokio::test]
async fn test_unchanged_source_is_not_republished() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    let active = h.bridge.active_source();
    let player = h.device(PLAYER);

    active.set_active_source(Some(player.clone()));
    active.set_active_source(Some(player));
    active.set_active_source(None);
    active.set_active_source(None);

    assert_eq!(
        h.sink.texts(&state("Player", "is_active_source")),
        vec!["on", "off"]
    );
}

#[tokio::test]
async fn test_display_standby_clears_source() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    h.bridge
        .active_source()
        .set_active_source(Some(h.device(STREAMER)));

    // Standby from anyone but the display is not a source change.
    h.dispatch(CecMessage::new(
        PLAYER,
        LogicalAddress::BROADCAST,
        Opcode::Standby,
        vec![],
    ));
    assert!(h.bridge.active_source().current().is_some());

    h.dispatch(CecMessage::parse("0f:36").unwrap());
    assert_eq!(h.bridge.active_source().current(), None);
    assert_eq!(
        h.sink.last_text(&state("Chromecast", "is_active_source")),
        Some("off".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_power_reports_publish_once() {
    let h = Harness::new(
        living_room(PowerStatus::Unknown),
        DeviceStore::in_memory(),
        settings(),
    );
    h.bridge.scan();
    settle().await;

    let topic = state("Player", "power");
    assert_eq!(h.sink.count(&topic), 0);

    h.dispatch(power_report(PLAYER, PowerStatus::On.as_byte()));
    h.dispatch(power_report(PLAYER, PowerStatus::On.as_byte()));
    assert_eq!(h.sink.texts(&topic), vec!["on"]);

    // Unknown is never published but lets the next value through.
    h.dispatch(power_report(PLAYER, PowerStatus::Unknown.as_byte()));
    assert_eq!(
        h.bridge.power().state(&h.device(PLAYER).id),
        Some(PowerState::Unknown)
    );
    h.dispatch(power_report(PLAYER, PowerStatus::On.as_byte()));
    assert_eq!(h.sink.texts(&topic), vec!["on", "on"]);

    // Transitions read as the state being left.
    h.dispatch(power_report(
        PLAYER,
        PowerStatus::InTransitionOnToStandby.as_byte(),
    ));
    h.dispatch(power_report(PLAYER, PowerStatus::Standby.as_byte()));
    h.dispatch(power_report(
        PLAYER,
        PowerStatus::InTransitionStandbyToOn.as_byte(),
    ));
    assert_eq!(h.sink.texts(&topic), vec!["on", "on", "off"]);
}

#[tokio::test(start_paused = true)]
async fn test_added_devices_are_announced_once_and_polled() {
    let mut h = Harness::new(living_room(PowerStatus::Standby), DeviceStore::in_memory(), settings());

    let added = Arc::new(AtomicUsize::new(0));
    let counter = added.clone();
    h.bridge.registry().register_added_handler(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.start_pump();
    h.bridge.scan();
    assert_eq!(added.load(Ordering::SeqCst), 3);
    assert_eq!(h.bridge.power().tracked(), 3);

    settle().await;
    assert_eq!(h.sink.texts(&state("TV", "power")), vec!["on"]);
    assert_eq!(h.sink.texts(&state("Player", "power")), vec!["off"]);
    assert_eq!(h.sink.texts(&state("Chromecast", "power")), vec!["on"]);

    // Each power monitor asked its device first; the display via broadcast.
    let requests: Vec<LogicalAddress> = h
        .bus
        .transmitted()
        .into_iter()
        .filter(|c| c.opcode == Opcode::GiveDevicePowerStatus)
        .map(|c| c.destination)
        .collect();
    assert!(requests.contains(&LogicalAddress::BROADCAST));
    assert!(requests.contains(&PLAYER));
    assert!(requests.contains(&STREAMER));

    // A device joining later is resolved from its first frame.
    h.bus.add_device(SimulatedDevice::new(
        LogicalAddress::AUDIO_SYSTEM,
        PhysicalAddress::new(0x3000),
        VendorId::new(0x00A0DE),
        "Receiver",
    ));
    let announce = CecMessage::new(
        LogicalAddress::AUDIO_SYSTEM,
        LogicalAddress::BROADCAST,
        Opcode::ReportPhysicalAddress,
        vec![0x30, 0x00, 0x05],
    );
    h.bus.inject(announce.clone());
    h.bus.inject(announce);
    settle().await;

    assert_eq!(added.load(Ordering::SeqCst), 4);
    assert_eq!(h.sink.texts(&state("Receiver", "power")), vec!["on"]);
    assert!(
        h.sink
            .subscriptions()
            .contains(&"cecsight/cec/Receiver/power/set".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_power_commands() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    settle().await;
    h.bus.clear_transmitted();

    let player_set = "cecsight/cec/Player/power/set";
    assert_eq!(h.sink.deliver(player_set, b"off"), 1);
    assert_eq!(
        h.bus.transmitted(),
        vec![CecCommand::standby(PLAYER)]
    );
    assert_eq!(h.bus.power_status(PLAYER), PowerStatus::Standby);

    // The command restarted the burst, so the new state shows up.
    settle().await;
    assert_eq!(
        h.sink.last_text(&state("Player", "power")),
        Some("off".to_string())
    );

    h.bus.clear_transmitted();
    h.sink.deliver(player_set, b" on\n");
    let sent: Vec<Opcode> = h
        .bus
        .transmitted()
        .into_iter()
        .map(|c| c.opcode)
        .take(2)
        .collect();
    assert_eq!(
        sent,
        vec![Opcode::UserControlPressed, Opcode::UserControlRelease]
    );

    h.bus.clear_transmitted();
    h.sink.deliver("cecsight/cec/TV/power/set", b"on");
    assert_eq!(
        h.bus.transmitted().first(),
        Some(&CecCommand::image_view_on(LogicalAddress::TV))
    );

    h.bus.clear_transmitted();
    h.sink.deliver(player_set, b"toggle");
    assert!(h.bus.transmitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_system_audio_mode_resets_only_that_device() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    settle().await;
    go_idle().await;
    h.bus.clear_transmitted();

    h.dispatch(CecMessage::new(
        PLAYER,
        LogicalAddress::BROADCAST,
        Opcode::SetSystemAudioMode,
        vec![0x01],
    ));
    settle().await;

    assert_eq!(power_requests(&h.bus), vec![PLAYER]);
}

#[tokio::test(start_paused = true)]
async fn test_standby_and_active_source_reset_every_device() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    settle().await;
    go_idle().await;
    h.bus.clear_transmitted();

    // Nothing is asked while idle.
    settle().await;
    assert!(power_requests(&h.bus).is_empty());

    h.dispatch(CecMessage::new(
        PLAYER,
        LogicalAddress::BROADCAST,
        Opcode::Standby,
        vec![],
    ));
    settle().await;
    assert_eq!(
        power_requests(&h.bus),
        vec![PLAYER, STREAMER, LogicalAddress::BROADCAST]
    );

    go_idle().await;
    h.bus.clear_transmitted();
    h.dispatch(CecMessage::new(
        STREAMER,
        LogicalAddress::BROADCAST,
        Opcode::ActiveSource,
        vec![0x20, 0x00],
    ));
    settle().await;
    assert_eq!(
        power_requests(&h.bus),
        vec![PLAYER, STREAMER, LogicalAddress::BROADCAST]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_path_change_repolls_active_source() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    settle().await;
    go_idle().await;
    assert_eq!(h.bridge.active_source().current(), Some(h.device(PLAYER)));

    // The frames the bus emits are not pumped, so only an explicit
    // dispatch can make the monitor look again.
    h.bus.set_active_source(Some(STREAMER));
    settle().await;
    assert_eq!(h.bridge.active_source().current(), Some(h.device(PLAYER)));

    h.dispatch(CecMessage::new(
        LogicalAddress::TV,
        LogicalAddress::BROADCAST,
        Opcode::SetStreamPath,
        vec![0x20, 0x00],
    ));
    settle().await;

    assert_eq!(h.bridge.active_source().current(), Some(h.device(STREAMER)));
    assert_eq!(
        h.sink.last_text(&state("Chromecast", "is_active_source")),
        Some("on".to_string())
    );
    assert_eq!(
        h.sink.last_text(&state("Player", "is_active_source")),
        Some("off".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_default_rescan_forgets_departed_devices() {
    let interval = CecConfig::default()
        .rescan_interval()
        .expect("rescan is on by default");

    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    tokio::spawn(h.bridge.clone().rescan(interval, h.cancel.clone()));
    settle().await;

    let player = h.device(PLAYER);
    let streamer = h.device(STREAMER);
    h.bus.remove_device(STREAMER);
    h.bus.remove_device(PLAYER);
    h.bus.add_device(SimulatedDevice::new(
        PLAYER,
        PhysicalAddress::new(0x3000),
        VendorId::new(0x00A0DE),
        "Receiver",
    ));

    // Until the next scan the address still maps to the departed player.
    assert_eq!(h.device(PLAYER).id, player.id);

    tokio::time::sleep(interval).await;
    settle().await;

    assert_eq!(h.bridge.registry().find_by_address(STREAMER), None);
    assert_eq!(h.bridge.registry().find_by_id(&streamer.id), None);

    let reused = h.device(PLAYER);
    assert_ne!(reused.id, player.id);
    assert_eq!(h.bridge.registry().record(&reused).osd_name, "Receiver");
    assert_eq!(h.bridge.registry().find_by_id(&player.id), None);
    assert_eq!(h.bridge.registry().record_count(), 4);
    assert_eq!(h.bridge.power().tracked(), 4);
}

#[tokio::test]
async fn test_resend_all_on_connect() {
    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings());
    h.bridge.scan();
    h.bridge
        .active_source()
        .set_active_source(Some(h.device(PLAYER)));
    h.sink.clear();

    h.sink.connect();

    assert_eq!(h.sink.texts(&state("Player", "is_active_source")), vec!["on"]);
    assert_eq!(h.sink.texts(&state("TV", "is_active_source")), vec!["off"]);
    assert_eq!(
        h.sink.texts(&state("Chromecast", "is_active_source")),
        vec!["off"]
    );
}

#[tokio::test]
async fn test_hub_birth_reannounces_and_resends() {
    let mut settings = settings();
    settings.hub_birth = Some(("homeassistant/status".to_string(), "online".to_string()));
    settings.discovery = Some(DiscoverySettings {
        prefix: "homeassistant".to_string(),
        availability: None,
        sw_version: "CecSight test".to_string(),
    });

    let h = Harness::new(living_room(PowerStatus::On), DeviceStore::in_memory(), settings);
    h.bridge.scan();

    let player = h.device(PLAYER);
    let switch = format!("homeassistant/switch/{}/power/config", player.id);
    let sensor = format!("homeassistant/binary_sensor/{}/is_active_source/config", player.id);
    assert_eq!(h.sink.count(&switch), 1);
    assert_eq!(h.sink.count(&sensor), 1);
    assert!(h.sink.was_retained(&switch));

    let config: serde_json::Value =
        serde_json::from_slice(&h.sink.last_payload(&switch).unwrap()).unwrap();
    assert_eq!(config["command_topic"], "cecsight/cec/Player/power/set");
    assert_eq!(config["state_topic"], "cecsight/cec/Player/power");
    assert_eq!(config["device"]["manufacturer"], "Sony");
    assert_eq!(config["device"]["sw_version"], "CecSight test");

    h.sink.clear();
    h.sink.deliver("homeassistant/status", b"offline");
    assert!(h.sink.published().is_empty());

    h.sink.deliver("homeassistant/status", b"online");
    assert_eq!(h.sink.count(&switch), 1);
    assert_eq!(h.sink.count(&sensor), 1);
    assert_eq!(h.sink.count(&state("Player", "is_active_source")), 1);
    assert_eq!(h.sink.count(&state("TV", "is_active_source")), 1);
}

#[tokio::test]
async fn test_ignored_device_is_never_surfaced() {
    let mut store = DeviceStore::in_memory();
    store.insert(DeviceRecord {
        id: DeviceId::new("ignored-player"),
        physical_address: PhysicalAddress::new(0x1000),
        vendor_id: VendorId::new(0x080046),
        osd_name: "Player".to_string(),
        topic: "player".to_string(),
        ignore: true,
    });

    let h = Harness::new(living_room(PowerStatus::On), store, settings());
    assert_eq!(h.bridge.scan(), 2);
    assert!(h.bridge.registry().find_by_address(PLAYER).is_none());
    assert_eq!(h.bridge.power().tracked(), 2);
    assert!(
        !h.sink
            .subscriptions()
            .iter()
            .any(|t| t.starts_with("cecsight/cec/player/"))
    );

    // Frames from it reach no bridge.
    h.dispatch(power_report(PLAYER, PowerStatus::Standby.as_byte()));
    assert_eq!(h.sink.count(&state("player", "power")), 0);
}

#[tokio::test]
async fn test_identities_survive_restart() {
    let dir = std::env::temp_dir().join(format!("cecsight-it-{}", std::process::id()));
    let path = dir.join(DEVICE_STORE_FILE);
    std::fs::remove_dir_all(&dir).ok();

    let first_ids: Vec<DeviceId> = {
        let h = Harness::new(
            living_room(PowerStatus::On),
            DeviceStore::load(&path).unwrap(),
            settings(),
        );
        h.bridge.scan();
        h.bridge.save().unwrap();
        h.bridge.registry().devices().into_iter().map(|d| d.id).collect()
    };
    assert_eq!(first_ids.len(), 3);

    // Same devices, shuffled logical addresses.
    let bus = SimulatedBus::with_devices(
        LogicalAddress::RECORDING_1,
        [
            SimulatedDevice::new(
                LogicalAddress::TV,
                PhysicalAddress::ROOT,
                VendorId::new(0x0000F0),
                "TV",
            ),
            SimulatedDevice::new(
                LogicalAddress::PLAYBACK_3,
                PhysicalAddress::new(0x1000),
                VendorId::new(0x080046),
                "Player",
            ),
            SimulatedDevice::new(
                PLAYER,
                PhysicalAddress::new(0x2000),
                VendorId::new(0x001A11),
                "Chromecast",
            ),
        ],
        None,
    )
    .unwrap();

    let h = Harness::new(Arc::new(bus), DeviceStore::load(&path).unwrap(), settings());
    h.bridge.scan();
    let mut second_ids: Vec<DeviceId> = h
        .bridge
        .registry()
        .devices()
        .into_iter()
        .map(|d| d.id)
        .collect();
    let mut first_ids = first_ids;
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);
    assert_eq!(h.bridge.registry().record_count(), 3);

    // The player's identity followed it to its new address.
    let player = h.device(LogicalAddress::PLAYBACK_3);
    assert_eq!(h.bridge.registry().record(&player).osd_name, "Player");

    std::fs::remove_dir_all(&dir).ok();
}
