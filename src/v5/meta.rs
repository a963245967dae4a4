//! Contains metadata about the V5
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Enum that represents the channel
/// for the V5 Controller
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum V5ControllerChannel {
    /// Used when wirelessly controlling the
    /// V5 Brain
    Pit = 0x00,
    /// Used when wirelessly uploading data to the V5
    /// Brain
    Download = 0x01,
}

/// The directory ("vendor") a file lives in on the brain.
/// Also known as the vid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileVendor {
    User,
    Sys,
    Dev1,
    /// PROS keeps its cold library here
    Dev2,
    Dev3,
    Dev4,
    Dev5,
    Dev6,
    VexVm,
    Vex,
    Undefined,
    Other(u8),
}

impl From<FileVendor> for u8 {
    fn from(vendor: FileVendor) -> u8 {
        match vendor {
            FileVendor::User => 1,
            FileVendor::Sys => 15,
            FileVendor::Dev1 => 16,
            FileVendor::Dev2 => 24,
            FileVendor::Dev3 => 32,
            FileVendor::Dev4 => 40,
            FileVendor::Dev5 => 48,
            FileVendor::Dev6 => 56,
            FileVendor::VexVm => 64,
            FileVendor::Vex => 240,
            FileVendor::Undefined => 241,
            FileVendor::Other(v) => v,
        }
    }
}

impl From<u8> for FileVendor {
    fn from(value: u8) -> FileVendor {
        match value {
            1 => FileVendor::User,
            15 => FileVendor::Sys,
            16 => FileVendor::Dev1,
            24 => FileVendor::Dev2,
            32 => FileVendor::Dev3,
            40 => FileVendor::Dev4,
            48 => FileVendor::Dev5,
            56 => FileVendor::Dev6,
            64 => FileVendor::VexVm,
            240 => FileVendor::Vex,
            241 => FileVendor::Undefined,
            v => FileVendor::Other(v),
        }
    }
}

impl Default for FileVendor {
    fn default() -> Self {
        FileVendor::User
    }
}

/// The memory a file transfer reads from or writes to
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileTransferTarget {
    Ddr = 0,
    #[default]
    Qspi = 1,
    Cbuf = 2,
    Vbuf = 3,
    Ddrc = 4,
    Ddre = 5,
    /// IQ2 only
    Flash = 6,
    /// IQ2 only
    Radio = 7,
    A1 = 13,
    B1 = 14,
    B2 = 15,
}

/// Whether a transfer session uploads or downloads
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileInitAction {
    Write = 1,
    Read = 2,
}

bitflags! {
    /// Options sent when opening a transfer session
    #[derive(Default)]
    pub struct FileInitOptions: u8 {
        const NONE = 0x0;
        const OVERWRITE = 0x1;
    }
}

/// A flag that tells the brain what to do
/// after a file transfer is complete
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FileExitAction {
    #[default]
    DoNothing = 0,
    RunProgram = 1,
    Halt = 3,
}

/// Run or stop a program that is already on the brain
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileLoadAction {
    Run = 0,
    Stop = 128,
}

/// Competition state to put the brain in
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Driver,
    Autonomous,
    Disabled,
}

impl MatchMode {
    /// The mode bits sent to the brain
    pub fn bits(&self) -> u8 {
        match self {
            MatchMode::Driver => 8,
            MatchMode::Autonomous => 10,
            MatchMode::Disabled => 11,
        }
    }
}

/// Kind of device plugged into a smart port
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmartDeviceType {
    Empty,
    V5Power,
    Motor,
    Led,
    AbsEncoderSensor,
    CrMotor,
    ImuSensor,
    DistanceSensor,
    RadioSensor,
    Controller,
    Brain,
    VisionSensor,
    Adi,
    PartnerController,
    Battery,
    Sol,
    OpticalSensor,
    Magnet,
    GpsSensor,
    Undefined(u8),
}

impl From<u8> for SmartDeviceType {
    fn from(value: u8) -> Self {
        match value {
            0 => SmartDeviceType::Empty,
            1 => SmartDeviceType::V5Power,
            2 => SmartDeviceType::Motor,
            3 => SmartDeviceType::Led,
            4 => SmartDeviceType::AbsEncoderSensor,
            5 => SmartDeviceType::CrMotor,
            6 => SmartDeviceType::ImuSensor,
            7 => SmartDeviceType::DistanceSensor,
            8 => SmartDeviceType::RadioSensor,
            9 => SmartDeviceType::Controller,
            10 => SmartDeviceType::Brain,
            11 => SmartDeviceType::VisionSensor,
            12 => SmartDeviceType::Adi,
            13 => SmartDeviceType::PartnerController,
            14 => SmartDeviceType::Battery,
            15 => SmartDeviceType::Sol,
            16 => SmartDeviceType::OpticalSensor,
            17 => SmartDeviceType::Magnet,
            20 => SmartDeviceType::GpsSensor,
            v => SmartDeviceType::Undefined(v),
        }
    }
}

/// USB product ids of the VEX serial devices this crate talks to
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VexProduct {
    V5Brain,
    V5BrainDfu,
    V5Controller,
}

impl VexProduct {
    pub fn product_id(&self) -> u16 {
        match self {
            VexProduct::V5Brain => super::VEX_V5_BRAIN_PID,
            VexProduct::V5BrainDfu => super::VEX_V5_BRAIN_DFU_PID,
            VexProduct::V5Controller => super::VEX_V5_CONTROLLER_PID,
        }
    }

    pub fn from_product_id(pid: u16) -> Option<Self> {
        match pid {
            super::VEX_V5_BRAIN_PID => Some(VexProduct::V5Brain),
            super::VEX_V5_BRAIN_DFU_PID => Some(VexProduct::V5BrainDfu),
            super::VEX_V5_CONTROLLER_PID => Some(VexProduct::V5Controller),
            _ => None,
        }
    }
}

bitflags! {
    /// Boot state flags from the system status reply
    pub struct SystemStatusFlags: u8 {
        const NONE = 0x0;
        const EVENT_BRAIN = 0x1;
        const ROM_BOOTLOADER_ACTIVE = 0x2;
        const RAM_BOOTLOADER_ACTIVE = 0x4;
    }
}
