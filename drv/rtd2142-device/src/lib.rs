//! Device lifecycle for a Realtek RTD2142 DisplayPort MST hub: quirk
//! handling, bus discovery, state tracking, and the host-facing metadata
//! (instance IDs, physical ID, protocol identifiers, version) a plugin
//! runtime or CLI needs around the protocol engine in `rtd2142-proto`.

use rtd2142_proto::bank::{self, DualBankInfo, FlashBank};
use rtd2142_proto::{mode, Bus, Error, I2cBus, I2cTransport, Phase, Progress, Result};

bitflags::bitflags! {
    /// Capability/requirement flags describing this device to its host,
    /// mirroring the flag vocabulary a plugin runtime would recognize.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        /// Not directly user-visible; discovered via another device.
        const INTERNAL          = 1 << 0;
        /// Firmware can be changed at all.
        const UPDATABLE         = 1 << 1;
        /// Has a spare bank to fail back to if the new image is bad.
        const DUAL_IMAGE        = 1 << 2;
        /// The written image can be read back and verified.
        const CAN_VERIFY_IMAGE  = 1 << 3;
        /// Must be power-cycled (not just re-probed) after an update.
        const NEEDS_SHUTDOWN    = 1 << 4;
        /// Currently running its update/recovery firmware, not the app.
        const IS_BOOTLOADER     = 1 << 5;
    }
}

/// Where a device is in its open/detach lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detached,
    Probed,
    Open,
    Isp,
}

/// The quirk keys this device understands, parsed from a quirks database
/// entry keyed on this device's instance IDs.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    /// Name of the `drm_dp_aux_dev` this hub's DDC/CI channel rides on.
    pub dp_aux_name: Option<String>,
}

impl Quirks {
    /// Apply a single `key = value` quirk entry.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "RealtekMstDpAuxName" => {
                self.dp_aux_name = Some(value.to_string());
                Ok(())
            }
            other => Err(Error::NotSupported(format!("unsupported quirk key \"{other}\""))),
        }
    }
}

/// Only this product name is accepted; anything else fails `probe()`.
const EXPECTED_NAME: &str = "RTD2142";

/// A Realtek RTD2142 MST hub, as seen by a host that discovered it through
/// its DisplayPort AUX channel.
pub struct Device {
    name: Option<String>,
    hwid_family: Option<String>,
    quirks: Quirks,
    state: State,
    bus: Option<I2cBus>,
    transport: Option<Box<dyn Bus>>,
    dual_bank: Option<DualBankInfo>,
    flags: DeviceFlags,
}

impl Device {
    pub fn new() -> Self {
        Self {
            name: None,
            hwid_family: None,
            quirks: Quirks::default(),
            state: State::Detached,
            bus: None,
            transport: None,
            dual_bank: None,
            flags: DeviceFlags::INTERNAL,
        }
    }

    /// Set the product name the host determined for this device (e.g. from
    /// the DRM connector's EDID). `probe()` rejects anything other than
    /// `"RTD2142"`.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Set the host's hardware-ID family string, used to qualify the most
    /// specific instance ID. Optional: a host with no HWID database of its
    /// own can leave this unset.
    pub fn set_hwid_family(&mut self, family: impl Into<String>) {
        self.hwid_family = Some(family.into());
    }

    pub fn set_quirk_kv(&mut self, key: &str, value: &str) -> Result<()> {
        self.quirks.set(key, value)
    }

    /// Locate the backing I²C bus via the configured DP-AUX quirk name.
    /// Does not open the bus yet.
    pub fn probe(&mut self) -> Result<()> {
        match self.name.as_deref() {
            Some(EXPECTED_NAME) => {}
            Some(other) => {
                return Err(Error::NotSupported(format!(
                    "device name \"{other}\" is not {EXPECTED_NAME}"
                )))
            }
            None => {
                return Err(Error::NotSupported(format!(
                    "device name not set, expected {EXPECTED_NAME}"
                )))
            }
        }
        let dp_aux_name = self.dp_aux_name()?;
        log::debug!("probing for DP aux \"{dp_aux_name}\"");
        self.bus = Some(rtd2142_proto::locate_bus(&dp_aux_name)?);
        self.state = State::Probed;
        Ok(())
    }

    /// Open the bus and query dual-bank status, filling in flags and
    /// version from whatever the hub reports.
    pub fn open(&mut self) -> Result<()> {
        if self.state == State::Detached {
            self.probe()?;
        }
        let bus = self.bus.as_ref().expect("probe() set self.bus");
        let transport = I2cTransport::open(&bus.device_path, rtd2142_proto::HUB_ADDRESS)?;
        self.transport = Some(Box::new(transport));
        self.state = State::Open;
        self.refresh_dual_bank()
    }

    /// Re-query dual-bank status over an already-open bus and refresh the
    /// flags/version derived from it. Called after [`Device::attach`] so a
    /// host can report the bank an update actually landed in.
    pub fn reload(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Internal(format!(
                "cannot reload from state {:?}, device must be open",
                self.state
            )));
        }
        self.refresh_dual_bank()
    }

    fn refresh_dual_bank(&mut self) -> Result<()> {
        let info = bank::query_dual_bank(self.transport_mut()?)?;
        self.flags.set(DeviceFlags::UPDATABLE, info.updatable());
        self.flags.set(DeviceFlags::DUAL_IMAGE, info.updatable());
        self.flags.set(DeviceFlags::CAN_VERIFY_IMAGE, info.updatable());
        if !info.updatable() {
            log::info!("device dual-bank mode does not support updates; treating as read-only");
        }
        self.dual_bank = Some(info);
        Ok(())
    }

    /// Close the bus, returning the device to its cold, unopened state.
    pub fn close(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Internal(format!(
                "cannot close from state {:?}, device must be open",
                self.state
            )));
        }
        self.transport = None;
        self.bus = None;
        self.state = State::Detached;
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut dyn Bus> {
        self.transport
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("device is not open".into()))
    }

    fn dp_aux_name(&self) -> Result<String> {
        self.quirks
            .dp_aux_name
            .clone()
            .ok_or_else(|| Error::NotSupported("no RealtekMstDpAuxName quirk set".into()))
    }

    /// Enter ISP mode so the flash can be written. Requires an open device.
    pub fn detach(&mut self, progress: &mut dyn Progress) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::Internal(format!(
                "cannot detach from state {:?}, device must be open",
                self.state
            )));
        }
        progress.set_phase(Phase::DeviceRestart);
        log::info!("entering ISP mode");
        mode::enter_isp(self.transport_mut()?)?;
        self.state = State::Isp;
        self.flags.insert(DeviceFlags::IS_BOOTLOADER);
        Ok(())
    }

    /// Trigger an MCU reset to leave ISP mode. The bus stays open either
    /// way, so a host can [`Device::reload`] the new dual-bank status or
    /// [`Device::close`] once it's done.
    pub fn attach(&mut self, progress: &mut dyn Progress) -> Result<()> {
        if self.state != State::Isp {
            return Err(Error::Internal(format!(
                "cannot attach from state {:?}, device must be in ISP mode",
                self.state
            )));
        }
        progress.set_phase(Phase::DeviceRestart);
        let ok = mode::exit_isp(self.transport_mut()?)?;
        self.flags.remove(DeviceFlags::IS_BOOTLOADER);
        self.state = State::Open;
        if !ok {
            self.flags.insert(DeviceFlags::NEEDS_SHUTDOWN);
            let name = self.quirks.dp_aux_name.clone().unwrap_or_default();
            return Err(mode::reset_failed(&name));
        }
        Ok(())
    }

    /// Write `image` into the inactive bank and commit it. Requires the
    /// device to be in ISP mode (see [`Device::detach`]).
    pub fn write_firmware(&mut self, image: &[u8], progress: &mut dyn Progress) -> Result<()> {
        if self.state != State::Isp {
            return Err(Error::Internal("device must be in ISP mode to write firmware".into()));
        }
        let active = self.dual_bank.and_then(|info| info.active_bank);
        let transport = self.transport_mut()?;
        bank::write_firmware(transport, active, image, progress)
    }

    /// Read back the active bank's firmware image. Requires an open
    /// device (not necessarily in ISP mode).
    pub fn read_firmware(&mut self, progress: &mut dyn Progress) -> Result<Vec<u8>> {
        let active = self.dual_bank.and_then(|info| info.active_bank);
        let transport = self.transport_mut()?;
        bank::read_firmware(transport, active, progress)
    }

    /// Dump the entire flash chip.
    pub fn dump_firmware(&mut self, progress: &mut dyn Progress) -> Result<Vec<u8>> {
        bank::dump_firmware(self.transport_mut()?, progress)
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    pub fn version(&self) -> Option<String> {
        self.dual_bank.as_ref().and_then(DualBankInfo::version_string)
    }

    pub fn active_bank(&self) -> Option<FlashBank> {
        self.dual_bank.as_ref().and_then(|info| info.active_bank)
    }

    /// Instance IDs a host would match this device against in a quirks or
    /// metadata database, most to least specific.
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Some(name) = &self.quirks.dp_aux_name else {
            return ids;
        };
        let name_id = format!("REALTEK-MST\\Name_{name}");
        if let Some(family) = &self.hwid_family {
            ids.push(format!("{name_id}&Family_{family}"));
        }
        ids.push(name_id);
        ids
    }

    /// Physical ID a host uses to tell two otherwise-identical devices
    /// apart, derived from the sysfs path of the underlying `i2c-dev`.
    pub fn physical_id(&self) -> Option<String> {
        self.bus.as_ref().map(|b| format!("I2C_PATH={}", b.sysfs_path.display()))
    }

    pub const PROTOCOL_ID: &'static str = "com.realtek.rtd2142";
    pub const VENDOR: &'static str = "Realtek";
    pub const SUMMARY: &'static str = "DisplayPort MST hub";
    pub const ICON: &'static str = "video-display";
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtd2142_proto::mock::MockHub;

    fn updatable_response() -> [u8; 11] {
        // header 0xCA 0x09, enabled=1, mode=Diff(1), active=User1(1),
        // user1 v1.2, user2 v1.1
        [0xCA, 0x09, 0x01, 0x01, 0x01, 0x01, 0x02, 0x01, 0x01, 0x00, 0x00]
    }

    fn open_device_with(hub: MockHub) -> Device {
        let mut device = Device::new();
        device.set_name("RTD2142");
        device.set_quirk_kv("RealtekMstDpAuxName", "card0-DP-1").unwrap();
        device.state = State::Probed;
        device.transport = Some(Box::new(hub));
        device.dual_bank = Some(bank::query_dual_bank(device.transport_mut().unwrap()).unwrap());
        device.flags.set(
            DeviceFlags::UPDATABLE,
            device.dual_bank.unwrap().updatable(),
        );
        device.state = State::Open;
        device
    }

    #[test]
    fn cold_probe_without_dual_bank_support_is_not_updatable() {
        let hub = MockHub::new();
        let device = open_device_with(hub);
        assert!(!device.flags().contains(DeviceFlags::UPDATABLE));
        assert_eq!(device.version(), None);
    }

    #[test]
    fn normal_probe_reports_version_and_updatable_flag() {
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(updatable_response());
        let device = open_device_with(hub);
        assert!(device.flags().contains(DeviceFlags::UPDATABLE));
        assert_eq!(device.version(), Some("1.2".to_string()));
        assert_eq!(device.active_bank(), Some(FlashBank::User1));
    }

    #[test]
    fn quirk_rejects_unknown_keys() {
        let mut device = Device::new();
        let err = device.set_quirk_kv("SomeOtherVendorThing", "1").unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn update_from_user1_lands_in_user2_and_verifies() {
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(updatable_response());
        let mut device = open_device_with(hub);

        device.state = State::Open;
        let mut progress = rtd2142_proto::NullProgress;
        device.detach(&mut progress).unwrap();
        assert!(device.flags().contains(DeviceFlags::IS_BOOTLOADER));

        let image = vec![0x42u8; bank::USER_SIZE as usize];
        device.write_firmware(&image, &mut progress).unwrap();

        device.attach(&mut progress).unwrap();
        assert!(!device.flags().contains(DeviceFlags::IS_BOOTLOADER));

        // The bus is still open after a successful attach, so the new
        // dual-bank status can be re-queried without reopening anything.
        device.reload().unwrap();
        assert!(device.flags().contains(DeviceFlags::UPDATABLE));

        device.close().unwrap();
    }

    #[test]
    fn attach_after_failed_reset_reports_needs_user_action() {
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(updatable_response());
        hub.reset_succeeds = false;
        let mut device = open_device_with(hub);

        let mut progress = rtd2142_proto::NullProgress;
        device.detach(&mut progress).unwrap();
        let err = device.attach(&mut progress).unwrap_err();
        assert!(matches!(err, Error::NeedsUserAction(_)));
        assert!(device.flags().contains(DeviceFlags::NEEDS_SHUTDOWN));
        // The bus stays open on a failed reset, so a host can still reload
        // or close the device instead of being stuck mid-lifecycle.
        device.close().unwrap();
    }

    #[test]
    fn write_firmware_rejects_wrong_size_image() {
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(updatable_response());
        let mut device = open_device_with(hub);
        let mut progress = rtd2142_proto::NullProgress;
        device.detach(&mut progress).unwrap();

        let err = device.write_firmware(&[0u8; 16], &mut progress).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn update_from_boot_targets_user1() {
        // header 0xCA 0x09, enabled=1, mode=Diff(1), active=Boot(0)
        let response = [0xCA, 0x09, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(response);
        let mut device = open_device_with(hub);
        assert_eq!(device.active_bank(), Some(FlashBank::Boot));
        assert_eq!(device.version(), None);

        let mut progress = rtd2142_proto::NullProgress;
        device.detach(&mut progress).unwrap();
        let image = vec![0x07u8; bank::USER_SIZE as usize];
        device.write_firmware(&image, &mut progress).unwrap();
        device.attach(&mut progress).unwrap();
    }

    #[test]
    fn write_firmware_reports_verify_mismatch() {
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(updatable_response());
        hub.corrupt_next_read = true;
        let mut device = open_device_with(hub);
        let mut progress = rtd2142_proto::NullProgress;
        device.detach(&mut progress).unwrap();

        let image = vec![0x09u8; bank::USER_SIZE as usize];
        let err = device.write_firmware(&image, &mut progress).unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[test]
    fn copy_mode_is_enabled_but_not_updatable_or_versioned() {
        // header 0xCA 0x09, enabled=1, mode=Copy(2), active=User1(1)
        let response = [0xCA, 0x09, 0x01, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01, 0x00, 0x00];
        let mut hub = MockHub::new();
        hub.set_dual_bank_response(response);
        let device = open_device_with(hub);
        assert!(!device.flags().contains(DeviceFlags::UPDATABLE));
        assert_eq!(device.active_bank(), None);
        assert_eq!(device.version(), None);
    }

    #[test]
    fn reload_and_close_require_an_open_device() {
        let mut device = Device::new();
        assert!(matches!(device.reload().unwrap_err(), Error::Internal(_)));
        assert!(matches!(device.close().unwrap_err(), Error::Internal(_)));
    }

    #[test]
    fn instance_ids_carry_the_name_and_optional_family() {
        let mut device = Device::new();
        device.set_quirk_kv("RealtekMstDpAuxName", "card0-DP-1").unwrap();
        assert_eq!(device.instance_ids(), vec!["REALTEK-MST\\Name_card0-DP-1".to_string()]);

        device.set_hwid_family("RTD2142");
        assert_eq!(
            device.instance_ids(),
            vec![
                "REALTEK-MST\\Name_card0-DP-1&Family_RTD2142".to_string(),
                "REALTEK-MST\\Name_card0-DP-1".to_string(),
            ]
        );
    }

    #[test]
    fn probe_rejects_wrong_device_name() {
        let mut device = Device::new();
        device.set_name("SomeOtherHub");
        device.set_quirk_kv("RealtekMstDpAuxName", "card0-DP-1").unwrap();
        let err = device.probe().unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn probe_requires_a_name_to_be_set() {
        let mut device = Device::new();
        device.set_quirk_kv("RealtekMstDpAuxName", "card0-DP-1").unwrap();
        let err = device.probe().unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
