//! BLE GATT glue for the RPC server.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: [`BleRpcService`] is driven directly by tests
//!   or a host simulator through [`GattEvent`]s.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                   | Perms      |
//! |----------------|----------------------------------------|------------|
//! | Service        | `5f524546-4c4f-575f-5250-435f5356435f` |            |
//! | RPC I/O        | `5f524546-4c4f-575f-5250-435f494f5f5f` | Read+Write |
//! | Auth           | `5f524546-4c4f-575f-5250-435f41555448` | Read+Write |
//!
//! A client writes request chunks to a characteristic and reads response
//! chunks back from the same one. A chunk can exceed the negotiated MTU, so
//! a read at offset 0 pulls the next chunk from the server and caches it;
//! follow-up reads at non-zero offsets (ATT Read Blob) are served from the
//! cache. Long writes arrive as prepared-write fragments and are applied on
//! execute.

use log::{debug, info, warn};

use crate::config::{ADVERTISED_NAME_MAX, MAX_CONNECTIONS};
use crate::rpc::server::{Channel, ConnHandle, RpcServer};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x5f524546_4c4f_575f_5250_435f5356435f;
pub const CHAR_RPC: u128 = 0x5f524546_4c4f_575f_5250_435f494f5f5f;
pub const CHAR_AUTH: u128 = 0x5f524546_4c4f_575f_5250_435f41555448;

/// Largest MTU the server offers during exchange.
pub const LOCAL_MTU: u16 = 517;

const CACHE_SLOTS: usize = MAX_CONNECTIONS * 2;

// ───────────────────────────────────────────────────────────────
// Events
// ───────────────────────────────────────────────────────────────

/// Stack events relevant to the RPC service, decoupled from Bluedroid
/// parameter structs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattEvent<'a> {
    Connected(ConnHandle),
    Disconnected(ConnHandle),
    Write {
        conn: ConnHandle,
        attr: u16,
        data: &'a [u8],
    },
    PrepareWrite {
        conn: ConnHandle,
        attr: u16,
        offset: u16,
        data: &'a [u8],
    },
    ExecuteWrite {
        conn: ConnHandle,
        commit: bool,
    },
    Read {
        conn: ConnHandle,
        attr: u16,
        offset: u16,
    },
}

// ───────────────────────────────────────────────────────────────
// Service
// ───────────────────────────────────────────────────────────────

struct PreparedWrite {
    attr: u16,
    data: Vec<u8>,
}

/// Routes GATT traffic for the two RPC characteristics to an
/// [`RpcServer`].
pub struct BleRpcService {
    server: RpcServer,
    rpc_attr: Option<u16>,
    auth_attr: Option<u16>,
    read_cache: heapless::FnvIndexMap<(ConnHandle, Channel), Vec<u8>, CACHE_SLOTS>,
    prepared: heapless::FnvIndexMap<ConnHandle, PreparedWrite, MAX_CONNECTIONS>,
}

impl BleRpcService {
    pub fn new(server: RpcServer) -> Self {
        Self {
            server,
            rpc_attr: None,
            auth_attr: None,
            read_cache: heapless::FnvIndexMap::new(),
            prepared: heapless::FnvIndexMap::new(),
        }
    }

    /// Record the attribute handle the stack assigned to `channel`.
    pub fn set_attr_handle(&mut self, channel: Channel, attr: u16) {
        match channel {
            Channel::Rpc => self.rpc_attr = Some(attr),
            Channel::Auth => self.auth_attr = Some(attr),
        }
    }

    pub fn channel_for(&self, attr: u16) -> Option<Channel> {
        if self.rpc_attr == Some(attr) {
            Some(Channel::Rpc)
        } else if self.auth_attr == Some(attr) {
            Some(Channel::Auth)
        } else {
            None
        }
    }

    pub fn server(&self) -> &RpcServer {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut RpcServer {
        &mut self.server
    }

    /// Configured device name cut to the advertising budget.
    pub fn advertised_name(&self) -> &str {
        self.server.config().advertised_name()
    }

    /// Apply one event. Returns the attribute value for reads of a known
    /// characteristic, `None` otherwise.
    pub fn handle(&mut self, event: GattEvent<'_>) -> Option<Vec<u8>> {
        match event {
            GattEvent::Connected(conn) => {
                if let Err(e) = self.server.on_connect(conn) {
                    warn!("BLE RPC: connection {} rejected: {}", conn, e);
                }
                self.forget(conn);
                None
            }
            GattEvent::Disconnected(conn) => {
                self.server.on_disconnect(conn);
                self.forget(conn);
                None
            }
            GattEvent::Write { conn, attr, data } => {
                self.write(conn, attr, data);
                None
            }
            GattEvent::PrepareWrite {
                conn,
                attr,
                offset,
                data,
            } => {
                self.prepare(conn, attr, offset, data);
                None
            }
            GattEvent::ExecuteWrite { conn, commit } => {
                if let Some(prepared) = self.prepared.remove(&conn) {
                    if commit {
                        self.write(conn, prepared.attr, &prepared.data);
                    } else {
                        debug!("BLE RPC: conn {} cancelled prepared write", conn);
                    }
                }
                None
            }
            GattEvent::Read { conn, attr, offset } => self.read(conn, attr, offset),
        }
    }

    fn write(&mut self, conn: ConnHandle, attr: u16, data: &[u8]) {
        let Some(channel) = self.channel_for(attr) else {
            debug!("BLE RPC: write to foreign attribute {}", attr);
            return;
        };
        debug!("BLE RPC: conn {} {:?} chunk {} bytes", conn, channel, data.len());
        self.server.on_write(conn, channel, data);
    }

    fn prepare(&mut self, conn: ConnHandle, attr: u16, offset: u16, data: &[u8]) {
        let offset = offset as usize;
        if offset == 0 {
            self.prepared.remove(&conn);
            let fresh = PreparedWrite {
                attr,
                data: Vec::new(),
            };
            if self.prepared.insert(conn, fresh).is_err() {
                warn!("BLE RPC: prepared-write table full");
                return;
            }
        }
        let Some(prepared) = self.prepared.get_mut(&conn) else {
            warn!("BLE RPC: conn {} prepared write without start", conn);
            return;
        };
        if prepared.attr != attr || prepared.data.len() != offset {
            warn!("BLE RPC: conn {} out-of-order prepared write", conn);
            self.prepared.remove(&conn);
            return;
        }
        prepared.data.extend_from_slice(data);
    }

    fn read(&mut self, conn: ConnHandle, attr: u16, offset: u16) -> Option<Vec<u8>> {
        let channel = self.channel_for(attr)?;
        let key = (conn, channel);
        if offset == 0 {
            let chunk = self.server.on_read(conn, channel);
            if self.read_cache.insert(key, chunk.clone()).is_err() {
                warn!("BLE RPC: read cache full");
            }
            return Some(chunk);
        }
        let offset = offset as usize;
        let tail = self
            .read_cache
            .get(&key)
            .and_then(|chunk| chunk.get(offset..))
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        Some(tail)
    }

    fn forget(&mut self, conn: ConnHandle) {
        self.read_cache.remove(&(conn, Channel::Rpc));
        self.read_cache.remove(&(conn, Channel::Auth));
        self.prepared.remove(&conn);
    }
}

// ───────────────────────────────────────────────────────────────
// Global service slot
// ───────────────────────────────────────────────────────────────

// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures, so the service lives in a static. GATTS callbacks run in the
// Bluedroid task (not ISR), so a std Mutex is fine.
static SERVICE: std::sync::Mutex<Option<BleRpcService>> = std::sync::Mutex::new(None);

/// Run `f` against the installed service, if any.
pub fn with_service<R>(f: impl FnOnce(&mut BleRpcService) -> R) -> Option<R> {
    let mut slot = SERVICE.lock().unwrap_or_else(|e| e.into_inner());
    slot.as_mut().map(f)
}

/// Install `service` and bring up the BLE stack, advertising under the
/// service's [`advertised_name`](BleRpcService::advertised_name).
pub fn start(service: BleRpcService) -> anyhow::Result<()> {
    let mut name = heapless::String::<ADVERTISED_NAME_MAX>::new();
    let _ = name.push_str(service.advertised_name());
    *SERVICE.lock().unwrap_or_else(|e| e.into_inner()) = Some(service);
    platform_start(&name)
}

/// Shut the stack down and drop the service.
pub fn stop() {
    platform_stop();
    SERVICE.lock().unwrap_or_else(|e| e.into_inner()).take();
}

#[cfg(not(target_os = "espidf"))]
fn platform_start(device_name: &str) -> anyhow::Result<()> {
    info!(
        "BLE(sim): advertising '{}' (service {:032x})",
        device_name, SERVICE_UUID
    );
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn platform_stop() {
    info!("BLE(sim): stopped");
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU32 = AtomicU32::new(0);

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    unsafe {
        t.uuid.uuid128 = uuid.to_le_bytes();
    }
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_rw_char(svc_handle: u16, uuid: u128) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    // Null control: every read and write is answered by the application.
    unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
            (ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_WRITE) as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe fn start_advertising() {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe {
        esp_ble_gap_start_advertising(&mut adv_params);
    }
}

/// Answer a request that expects a response. `value` is echoed for reads
/// and prepared writes.
#[cfg(target_os = "espidf")]
unsafe fn send_response(
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    conn_id: u16,
    trans_id: u32,
    handle: u16,
    offset: u16,
    value: Option<&[u8]>,
) {
    use esp_idf_svc::sys::*;
    let Some(value) = value else {
        unsafe {
            esp_ble_gatts_send_response(
                gatts_if,
                conn_id,
                trans_id,
                esp_gatt_status_t_ESP_GATT_OK,
                core::ptr::null_mut(),
            );
        }
        return;
    };
    let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
    unsafe {
        let attr = &mut rsp.attr_value;
        let len = value.len().min(attr.value.len());
        attr.value[..len].copy_from_slice(&value[..len]);
        attr.len = len as u16;
        attr.handle = handle;
        attr.offset = offset;
        esp_ble_gatts_send_response(
            gatts_if,
            conn_id,
            trans_id,
            esp_gatt_status_t_ESP_GATT_OK,
            &mut rsp,
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            info!("BLE GATTS: app registered (if={})", gatts_if);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid128_to_esp(SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            };
            // Service declaration + two characteristics (declaration + value).
            unsafe {
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, 6);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            BLE_SVC_HANDLE.store(svc_handle as u32, AtomicOrdering::Relaxed);
            info!("BLE GATTS: service created (handle={})", svc_handle);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
            }
            BLE_CHAR_STEP.store(1, AtomicOrdering::Relaxed);
            unsafe { add_rw_char(svc_handle, CHAR_RPC) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { (*param).add_char.attr_handle };
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
            match BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) {
                1 => {
                    with_service(|s| s.set_attr_handle(Channel::Rpc, handle));
                    info!("BLE GATTS: RPC char (handle={})", handle);
                    BLE_CHAR_STEP.store(2, AtomicOrdering::Relaxed);
                    unsafe { add_rw_char(svc_handle, CHAR_AUTH) };
                }
                2 => {
                    with_service(|s| s.set_attr_handle(Channel::Auth, handle));
                    info!("BLE GATTS: auth char (handle={}), all registered", handle);
                    BLE_CHAR_STEP.store(3, AtomicOrdering::Relaxed);
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            let p = unsafe { &(*param).mtu };
            debug!("BLE GATTS: MTU {} (conn_id={})", p.mtu, p.conn_id);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let conn = unsafe { (*param).connect.conn_id };
            info!("BLE GATTS: client connected (conn_id={})", conn);
            with_service(|s| s.handle(GattEvent::Connected(conn)));
            // Keep advertising so further centrals can connect.
            unsafe { start_advertising() };
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let conn = unsafe { (*param).disconnect.conn_id };
            info!("BLE GATTS: client disconnected (conn_id={})", conn);
            with_service(|s| s.handle(GattEvent::Disconnected(conn)));
            unsafe { start_advertising() };
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
            let event = if p.is_prep {
                GattEvent::PrepareWrite {
                    conn: p.conn_id,
                    attr: p.handle,
                    offset: p.offset,
                    data,
                }
            } else {
                GattEvent::Write {
                    conn: p.conn_id,
                    attr: p.handle,
                    data,
                }
            };
            with_service(|s| s.handle(event));
            if p.need_rsp {
                let echo = if p.is_prep { Some(data) } else { None };
                unsafe { send_response(gatts_if, p.conn_id, p.trans_id, p.handle, p.offset, echo) };
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_EXEC_WRITE_EVT => {
            let p = unsafe { &(*param).exec_write };
            let commit = p.exec_write_flag == ESP_GATT_PREP_WRITE_EXEC as u8;
            with_service(|s| {
                s.handle(GattEvent::ExecuteWrite {
                    conn: p.conn_id,
                    commit,
                })
            });
            unsafe { send_response(gatts_if, p.conn_id, p.trans_id, 0, 0, None) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &(*param).read };
            let value = with_service(|s| {
                s.handle(GattEvent::Read {
                    conn: p.conn_id,
                    attr: p.handle,
                    offset: p.offset,
                })
            })
            .flatten()
            .unwrap_or_default();
            if p.need_rsp {
                unsafe {
                    send_response(gatts_if, p.conn_id, p.trans_id, p.handle, p.offset, Some(&value))
                };
            }
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
fn platform_start(device_name: &str) -> anyhow::Result<()> {
    use esp_idf_svc::sys::*;

    // Bluedroid copies the name; it still needs a NUL terminator.
    let mut name = heapless::Vec::<u8, { ADVERTISED_NAME_MAX + 1 }>::new();
    let bytes = crate::config::truncate_utf8(device_name, ADVERTISED_NAME_MAX).as_bytes();
    let _ = name.extend_from_slice(bytes);
    let _ = name.push(0);

    unsafe {
        // BLE only; give classic BT memory back to the heap.
        esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

        let mut bt_cfg = esp_bt_controller_config_t::default();
        esp!(esp_bt_controller_init(&mut bt_cfg))?;
        esp!(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
        esp!(esp_bluedroid_init())?;
        esp!(esp_bluedroid_enable())?;

        esp!(esp_ble_gap_register_callback(Some(ble_gap_event_handler)))?;
        esp!(esp_ble_gatts_register_callback(Some(ble_gatts_event_handler)))?;
        esp!(esp_ble_gatts_app_register(0))?;
        esp!(esp_ble_gatt_set_local_mtu(LOCAL_MTU))?;

        esp!(esp_ble_gap_set_device_name(name.as_ptr() as *const _))?;
        start_advertising();
    }

    info!("BLE(espidf): Bluedroid up, advertising as '{}'", device_name);
    Ok(())
}

#[cfg(target_os = "espidf")]
fn platform_stop() {
    use esp_idf_svc::sys::*;
    unsafe {
        esp_ble_gap_stop_advertising();
        esp_bluedroid_disable();
        esp_bluedroid_deinit();
        esp_bt_controller_disable();
        esp_bt_controller_deinit();
    }
    info!("BLE(espidf): stack shut down");
}

// ── Tests ────────────────────────────────────────────────────
