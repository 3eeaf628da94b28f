//! Message types and data object interpretation
//!
//! The header's 5-bit type is a control message when the packet carries no
//! data objects and a data message otherwise. Each data object is decoded
//! according to the message it belongs to. Request objects depend on what
//! was offered earlier: the object position points at a PDO from the last
//! capabilities message, whose kind selects the request layout. That
//! history lives in a [`CapabilityMemo`].
//!
//! Units follow the wire encoding and stay integral (mV, mA, mW); only
//! labels are formatted as decimals, rounded half up.

use std::fmt;

use super::frame::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    GoodCrc,
    GotoMin,
    Accept,
    Reject,
    Ping,
    PsRdy,
    GetSourceCap,
    GetSinkCap,
    DrSwap,
    PrSwap,
    VconnSwap,
    Wait,
    SoftReset,
    DataReset,
    DataResetComplete,
    NotSupported,
    GetSourceCapExtended,
    GetStatus,
    FrSwap,
    GetPpsStatus,
    GetCountryCodes,
    GetSinkCapExtended,
}

impl ControlMessage {
    pub fn from_type(code: u8) -> Option<Self> {
        use ControlMessage::*;
        Some(match code {
            1 => GoodCrc,
            2 => GotoMin,
            3 => Accept,
            4 => Reject,
            5 => Ping,
            6 => PsRdy,
            7 => GetSourceCap,
            8 => GetSinkCap,
            9 => DrSwap,
            10 => PrSwap,
            11 => VconnSwap,
            12 => Wait,
            13 => SoftReset,
            14 => DataReset,
            15 => DataResetComplete,
            16 => NotSupported,
            17 => GetSourceCapExtended,
            18 => GetStatus,
            19 => FrSwap,
            20 => GetPpsStatus,
            21 => GetCountryCodes,
            22 => GetSinkCapExtended,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use ControlMessage::*;
        match self {
            GoodCrc => "GOOD CRC",
            GotoMin => "GOTO MIN",
            Accept => "ACCEPT",
            Reject => "REJECT",
            Ping => "PING",
            PsRdy => "PS RDY",
            GetSourceCap => "GET SOURCE CAP",
            GetSinkCap => "GET SINK CAP",
            DrSwap => "DR SWAP",
            PrSwap => "PR SWAP",
            VconnSwap => "VCONN SWAP",
            Wait => "WAIT",
            SoftReset => "SOFT RESET",
            DataReset => "DATA RESET",
            DataResetComplete => "DATA RESET COMPLETE",
            NotSupported => "NOT SUPPORTED",
            GetSourceCapExtended => "GET SOURCE CAP EXTENDED",
            GetStatus => "GET STATUS",
            FrSwap => "FR SWAP",
            GetPpsStatus => "GET PPS STATUS",
            GetCountryCodes => "GET COUNTRY CODES",
            GetSinkCapExtended => "GET SINK CAP EXTENDED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataMessage {
    SourceCapabilities,
    Request,
    Bist,
    SinkCapabilities,
    BatteryStatus,
    Alert,
    GetCountryInfo,
    VendorDefined,
}

impl DataMessage {
    pub fn from_type(code: u8) -> Option<Self> {
        use DataMessage::*;
        Some(match code {
            1 => SourceCapabilities,
            2 => Request,
            3 => Bist,
            4 => SinkCapabilities,
            5 => BatteryStatus,
            6 => Alert,
            7 => GetCountryInfo,
            15 => VendorDefined,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use DataMessage::*;
        match self {
            SourceCapabilities => "SOURCE CAP",
            Request => "REQUEST",
            Bist => "BIST",
            SinkCapabilities => "SINK CAP",
            BatteryStatus => "BATTERY STATUS",
            Alert => "ALERT",
            GetCountryInfo => "GET COUNTRY INFO",
            VendorDefined => "VDM",
        }
    }
}

fn extended_name(code: u8) -> Option<&'static str> {
    Some(match code {
        1 => "SOURCE CAP EXTENDED",
        2 => "STATUS",
        3 => "GET BATTERY CAP",
        4 => "GET BATTERY STATUS",
        5 => "BATTERY CAPABILITIES",
        6 => "GET MANUFACTURER INFO",
        7 => "MANUFACTURER INFO",
        8 => "SECURITY REQUEST",
        9 => "SECURITY RESPONSE",
        10 => "FIRMWARE UPDATE REQUEST",
        11 => "FIRMWARE UPDATE RESPONSE",
        12 => "PPS STATUS",
        13 => "COUNTRY INFO",
        14 => "COUNTRY CODES",
        15 => "SINK CAP EXTENDED",
        _ => return None,
    })
}

/// What a header says the packet is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Control(ControlMessage),
    Data(DataMessage),
    /// Extended message; its data objects are chunked bytes shown raw
    Extended(u8),
    Reserved { data: bool, code: u8 },
}

impl MessageType {
    pub fn from_header(header: Header) -> Self {
        let code = header.message_type();
        if header.is_extended() {
            return MessageType::Extended(code);
        }
        if header.is_control() {
            ControlMessage::from_type(code)
                .map(MessageType::Control)
                .unwrap_or(MessageType::Reserved { data: false, code })
        } else {
            DataMessage::from_type(code)
                .map(MessageType::Data)
                .unwrap_or(MessageType::Reserved { data: true, code })
        }
    }

    pub fn is_data(self) -> bool {
        match self {
            MessageType::Control(_) => false,
            MessageType::Data(_) | MessageType::Extended(_) => true,
            MessageType::Reserved { data, .. } => data,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageType::Control(msg) => f.write_str(msg.name()),
            MessageType::Data(msg) => f.write_str(msg.name()),
            MessageType::Extended(code) => match extended_name(*code) {
                Some(name) => f.write_str(name),
                None => write!(f, "EXTENDED {}", code),
            },
            MessageType::Reserved { data: false, code } => write!(f, "RESERVED CTRL {}", code),
            MessageType::Reserved { data: true, code } => write!(f, "RESERVED DATA {}", code),
        }
    }
}

/// Render `milli` thousandths with `decimals` digits, rounding half up.
pub fn format_milli(milli: u32, decimals: u32) -> String {
    let decimals = decimals.min(3);
    let scale = 10u64.pow(3 - decimals);
    let rounded = (u64::from(milli) + scale / 2) / scale;
    if decimals == 0 {
        return rounded.to_string();
    }
    let unit = 10u64.pow(decimals);
    format!(
        "{}.{:0width$}",
        rounded / unit,
        rounded % unit,
        width = decimals as usize
    )
}

fn field(word: u32, shift: u32, bits: u32) -> u32 {
    (word >> shift) & ((1 << bits) - 1)
}

fn append_flags(label: &mut String, word: u32, flags: &[(u32, &str)]) {
    for &(bit, name) in flags {
        if word & (1 << bit) != 0 {
            label.push_str(" [");
            label.push_str(name);
            label.push(']');
        }
    }
}

const FIXED_SOURCE_FLAGS: &[(u32, &str)] = &[
    (29, "dual_role_power"),
    (28, "usb_suspend"),
    (27, "unconstrained"),
    (26, "usb_comm"),
    (25, "dual_role_data"),
    (24, "unchunked"),
];

const FIXED_SINK_FLAGS: &[(u32, &str)] = &[
    (29, "dual_role_power"),
    (28, "higher_capability"),
    (27, "unconstrained"),
    (26, "usb_comm"),
    (25, "dual_role_data"),
];

const PPS_SOURCE_FLAGS: &[(u32, &str)] = &[(27, "power_limited")];

const REQUEST_FLAGS: &[(u32, &str)] = &[
    (27, "give_back"),
    (26, "cap_mismatch"),
    (25, "usb_comm"),
    (24, "no_usb_suspend"),
    (23, "unchunked"),
];

/// Supply kinds a PDO can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdoKind {
    Fixed,
    Battery,
    Variable,
    Pps,
    ReservedApdo,
}

/// Power data object, one supply offered or needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDataObject {
    Fixed {
        millivolts: u32,
        milliamps: u32,
    },
    Battery {
        min_millivolts: u32,
        max_millivolts: u32,
        milliwatts: u32,
    },
    Variable {
        min_millivolts: u32,
        max_millivolts: u32,
        milliamps: u32,
    },
    Pps {
        min_millivolts: u32,
        max_millivolts: u32,
        milliamps: u32,
    },
    ReservedApdo,
}

impl PowerDataObject {
    pub fn parse(word: u32) -> Self {
        match word >> 30 {
            0 => PowerDataObject::Fixed {
                millivolts: field(word, 10, 10) * 50,
                milliamps: field(word, 0, 10) * 10,
            },
            1 => PowerDataObject::Battery {
                max_millivolts: field(word, 20, 10) * 50,
                min_millivolts: field(word, 10, 10) * 50,
                milliwatts: field(word, 0, 10) * 250,
            },
            2 => PowerDataObject::Variable {
                max_millivolts: field(word, 20, 10) * 50,
                min_millivolts: field(word, 10, 10) * 50,
                milliamps: field(word, 0, 10) * 10,
            },
            _ if field(word, 28, 2) == 0 => PowerDataObject::Pps {
                max_millivolts: field(word, 17, 8) * 100,
                min_millivolts: field(word, 8, 8) * 100,
                milliamps: field(word, 0, 7) * 50,
            },
            _ => PowerDataObject::ReservedApdo,
        }
    }

    pub fn kind(&self) -> PdoKind {
        match self {
            PowerDataObject::Fixed { .. } => PdoKind::Fixed,
            PowerDataObject::Battery { .. } => PdoKind::Battery,
            PowerDataObject::Variable { .. } => PdoKind::Variable,
            PowerDataObject::Pps { .. } => PdoKind::Pps,
            PowerDataObject::ReservedApdo => PdoKind::ReservedApdo,
        }
    }

    fn label(&self, word: u32, source: bool) -> String {
        let mut label = match *self {
            PowerDataObject::Fixed {
                millivolts,
                milliamps,
            } => format!(
                "FIX:{}V {}A",
                format_milli(millivolts, 2),
                format_milli(milliamps, 2)
            ),
            PowerDataObject::Battery {
                min_millivolts,
                max_millivolts,
                milliwatts,
            } => format!(
                "BAT:{}/{}V {}W",
                format_milli(min_millivolts, 1),
                format_milli(max_millivolts, 1),
                format_milli(milliwatts, 1)
            ),
            PowerDataObject::Variable {
                min_millivolts,
                max_millivolts,
                milliamps,
            } => format!(
                "VAR:{}/{}V {}A",
                format_milli(min_millivolts, 1),
                format_milli(max_millivolts, 1),
                format_milli(milliamps, 1)
            ),
            PowerDataObject::Pps {
                min_millivolts,
                max_millivolts,
                milliamps,
            } => format!(
                "PPS:{}/{}V {}A",
                format_milli(min_millivolts, 1),
                format_milli(max_millivolts, 1),
                format_milli(milliamps, 2)
            ),
            PowerDataObject::ReservedApdo => format!("APDO?:{:08x}", word),
        };

        match (self.kind(), source) {
            (PdoKind::Fixed, true) => append_flags(&mut label, word, FIXED_SOURCE_FLAGS),
            (PdoKind::Fixed, false) => {
                append_flags(&mut label, word, FIXED_SINK_FLAGS);
                match field(word, 23, 2) {
                    1 => label.push_str(" [fr_swap default]"),
                    2 => label.push_str(" [fr_swap 1.5A]"),
                    3 => label.push_str(" [fr_swap 3.0A]"),
                    _ => {}
                }
            }
            (PdoKind::Pps, true) => append_flags(&mut label, word, PPS_SOURCE_FLAGS),
            _ => {}
        }
        label
    }
}

/// Request data object, decoded per the kind of the PDO it selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestObject {
    /// Fixed or variable supply
    Current {
        position: u8,
        operating_milliamps: u32,
        max_milliamps: u32,
    },
    Battery {
        position: u8,
        operating_milliwatts: u32,
        max_milliwatts: u32,
    },
    Pps {
        position: u8,
        millivolts: u32,
        milliamps: u32,
    },
}

impl RequestObject {
    /// Object position, 1-based
    pub fn position_of(word: u32) -> u8 {
        field(word, 28, 3) as u8
    }

    pub fn parse(word: u32, kind: Option<PdoKind>) -> Self {
        let position = Self::position_of(word);
        match kind {
            Some(PdoKind::Battery) => RequestObject::Battery {
                position,
                operating_milliwatts: field(word, 10, 10) * 250,
                max_milliwatts: field(word, 0, 10) * 250,
            },
            Some(PdoKind::Pps) => RequestObject::Pps {
                position,
                millivolts: field(word, 9, 11) * 20,
                milliamps: field(word, 0, 7) * 50,
            },
            _ => RequestObject::Current {
                position,
                operating_milliamps: field(word, 10, 10) * 10,
                max_milliamps: field(word, 0, 10) * 10,
            },
        }
    }

    fn label(&self, word: u32) -> String {
        let mut label = match *self {
            RequestObject::Current {
                position,
                operating_milliamps,
                max_milliamps,
            } => format!(
                "REQ#{}:{}A/{}A",
                position,
                format_milli(operating_milliamps, 2),
                format_milli(max_milliamps, 2)
            ),
            RequestObject::Battery {
                position,
                operating_milliwatts,
                max_milliwatts,
            } => format!(
                "REQ#{}:{}W/{}W",
                position,
                format_milli(operating_milliwatts, 2),
                format_milli(max_milliwatts, 2)
            ),
            RequestObject::Pps {
                position,
                millivolts,
                milliamps,
            } => format!(
                "REQ#{}:{}V {}A",
                position,
                format_milli(millivolts, 2),
                format_milli(milliamps, 2)
            ),
        };
        append_flags(&mut label, word, REQUEST_FLAGS);
        label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdmCommandType {
    Request,
    Ack,
    Nak,
    Busy,
}

impl VdmCommandType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => VdmCommandType::Request,
            1 => VdmCommandType::Ack,
            2 => VdmCommandType::Nak,
            _ => VdmCommandType::Busy,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VdmCommandType::Request => "REQ",
            VdmCommandType::Ack => "ACK",
            VdmCommandType::Nak => "NAK",
            VdmCommandType::Busy => "BSY",
        }
    }
}

fn vdm_command_name(command: u8) -> Option<&'static str> {
    Some(match command {
        1 => "Disc Ident",
        2 => "Disc SVID",
        3 => "Disc Mode",
        4 => "Enter Mode",
        5 => "Exit Mode",
        6 => "Attention",
        16 => "DP Status",
        17 => "DP Configure",
        _ => return None,
    })
}

/// First object of a vendor defined message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdmHeader {
    Structured {
        svid: u16,
        command: u8,
        command_type: VdmCommandType,
        position: u8,
        /// 0 for v1.0, 1 for v2.0
        version: u8,
    },
    Unstructured {
        svid: u16,
        payload: u16,
    },
}

impl VdmHeader {
    pub fn parse(word: u32) -> Self {
        let svid = (word >> 16) as u16;
        if word & (1 << 15) != 0 {
            VdmHeader::Structured {
                svid,
                command: field(word, 0, 5) as u8,
                command_type: VdmCommandType::from_bits(field(word, 6, 2)),
                position: field(word, 8, 3) as u8,
                version: field(word, 13, 2) as u8,
            }
        } else {
            VdmHeader::Unstructured {
                svid,
                payload: (word & 0x7FFF) as u16,
            }
        }
    }

    fn label(&self) -> String {
        match *self {
            VdmHeader::Structured {
                svid,
                command,
                command_type,
                position,
                version,
            } => {
                let command = match vdm_command_name(command) {
                    Some(name) => name.to_string(),
                    None => format!("CMD{}", command),
                };
                let version = match version {
                    0 => "v1.0",
                    1 => "v2.0",
                    _ => "v?",
                };
                format!(
                    "{} {} pos{} {} SVID:{:04x}",
                    command_type.name(),
                    command,
                    position,
                    version,
                    svid
                )
            }
            VdmHeader::Unstructured { svid, payload } => {
                format!("unstruct [{:04x}] SVID:{:04x}", payload, svid)
            }
        }
    }
}

/// BIST data object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BistObject {
    pub mode: u8,
    pub counter: u16,
}

impl BistObject {
    pub const COUNTERS: u8 = 2;

    pub fn parse(word: u32) -> Self {
        Self {
            mode: (word >> 28) as u8,
            counter: (word & 0xFFFF) as u16,
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            0 => "Receiver mode",
            1 => "Transmit mode",
            2 => "Returned BIST Counters",
            3 => "Carrier Mode 0",
            4 => "Carrier Mode 1",
            5 => "Carrier Mode 2",
            6 => "Carrier Mode 3",
            7 => "Eye Pattern",
            8 => "Test Data",
            _ => "INVALID",
        }
    }

    fn label(&self) -> String {
        if self.mode == Self::COUNTERS {
            format!("BIST:Counter[={}]", self.counter)
        } else {
            format!("BIST:{}", self.mode_name())
        }
    }
}

/// One data object with its meaning in context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataObject {
    SourceCapability { word: u32, pdo: PowerDataObject },
    SinkCapability { word: u32, pdo: PowerDataObject },
    Request { word: u32, request: RequestObject },
    VdmHeader { word: u32, header: VdmHeader },
    Vdo(u32),
    Bist { word: u32, bist: BistObject },
    Raw(u32),
}

impl DataObject {
    pub fn word(&self) -> u32 {
        match *self {
            DataObject::SourceCapability { word, .. }
            | DataObject::SinkCapability { word, .. }
            | DataObject::Request { word, .. }
            | DataObject::VdmHeader { word, .. }
            | DataObject::Bist { word, .. } => word,
            DataObject::Vdo(word) | DataObject::Raw(word) => word,
        }
    }

    /// Full description including flags
    pub fn label(&self) -> String {
        match self {
            DataObject::SourceCapability { word, pdo } => pdo.label(*word, true),
            DataObject::SinkCapability { word, pdo } => pdo.label(*word, false),
            DataObject::Request { word, request } => request.label(*word),
            DataObject::VdmHeader { header, .. } => header.label(),
            DataObject::Vdo(word) => format!("VDO:{:08x}", word),
            DataObject::Bist { bist, .. } => bist.label(),
            DataObject::Raw(word) => format!("RAW:{:08x}", word),
        }
    }

    /// Compact name for the object at `index` (0-based)
    pub fn short_label(&self, index: usize) -> String {
        match self {
            DataObject::SourceCapability { .. } | DataObject::SinkCapability { .. } => {
                format!("PDO{}", index + 1)
            }
            DataObject::Request { .. } => "RDO".to_string(),
            DataObject::VdmHeader { .. } | DataObject::Vdo(_) => format!("VDM{}", index + 1),
            DataObject::Bist { .. } => "BIST".to_string(),
            DataObject::Raw(_) => format!("D{}", index + 1),
        }
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Kinds of the PDOs in the last capabilities message on a line, by
/// position. Cleared by a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityMemo {
    kinds: Vec<PdoKind>,
}

impl CapabilityMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// PDO kind at a 1-based object position
    pub fn kind_at(&self, position: u8) -> Option<PdoKind> {
        usize::from(position)
            .checked_sub(1)
            .and_then(|i| self.kinds.get(i))
            .copied()
    }

    /// Remember the offer carried by a capabilities message. Other messages
    /// leave the memo alone.
    pub fn record(&mut self, objects: &[DataObject]) {
        let kinds: Vec<PdoKind> = objects
            .iter()
            .filter_map(|object| match object {
                DataObject::SourceCapability { pdo, .. } | DataObject::SinkCapability { pdo, .. } => {
                    Some(pdo.kind())
                }
                _ => None,
            })
            .collect();
        if !kinds.is_empty() {
            self.kinds = kinds;
        }
    }

    pub fn clear(&mut self) {
        self.kinds.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Decodes the data objects of one message
pub struct PayloadInterpreter<'a> {
    memo: &'a CapabilityMemo,
}

impl<'a> PayloadInterpreter<'a> {
    pub fn new(memo: &'a CapabilityMemo) -> Self {
        Self { memo }
    }

    pub fn interpret(&self, message: MessageType, words: &[u32]) -> Vec<DataObject> {
        words
            .iter()
            .enumerate()
            .map(|(index, &word)| self.object(message, index, word))
            .collect()
    }

    fn object(&self, message: MessageType, index: usize, word: u32) -> DataObject {
        let MessageType::Data(data) = message else {
            return DataObject::Raw(word);
        };
        match data {
            DataMessage::SourceCapabilities => DataObject::SourceCapability {
                word,
                pdo: PowerDataObject::parse(word),
            },
            DataMessage::SinkCapabilities => DataObject::SinkCapability {
                word,
                pdo: PowerDataObject::parse(word),
            },
            DataMessage::Request => {
                let kind = self.memo.kind_at(RequestObject::position_of(word));
                DataObject::Request {
                    word,
                    request: RequestObject::parse(word, kind),
                }
            }
            DataMessage::VendorDefined if index == 0 => DataObject::VdmHeader {
                word,
                header: VdmHeader::parse(word),
            },
            DataMessage::VendorDefined => DataObject::Vdo(word),
            DataMessage::Bist if index == 0 => DataObject::Bist {
                word,
                bist: BistObject::parse(word),
            },
            _ => DataObject::Raw(word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(message: MessageType, words: &[u32], memo: &CapabilityMemo) -> Vec<String> {
        PayloadInterpreter::new(memo)
            .interpret(message, words)
            .iter()
            .map(DataObject::label)
            .collect()
    }

    const SOURCE_CAP: MessageType = MessageType::Data(DataMessage::SourceCapabilities);
    const SINK_CAP: MessageType = MessageType::Data(DataMessage::SinkCapabilities);
    const REQUEST: MessageType = MessageType::Data(DataMessage::Request);

    #[test]
    fn test_format_milli_rounds_half_up() {
        assert_eq!(format_milli(5000, 2), "5.00");
        assert_eq!(format_milli(20000, 1), "20.0");
        assert_eq!(format_milli(3250, 1), "3.3");
        assert_eq!(format_milli(3249, 1), "3.2");
        assert_eq!(format_milli(15, 2), "0.02");
        assert_eq!(format_milli(1500, 0), "2");
    }

    #[test]
    fn test_message_types() {
        assert_eq!(
            MessageType::from_header(Header(0x0563)),
            MessageType::Control(ControlMessage::Accept)
        );
        assert_eq!(
            MessageType::from_header(Header(0x2161)),
            MessageType::Data(DataMessage::SourceCapabilities)
        );
        assert_eq!(
            MessageType::from_header(Header(0x0060)),
            MessageType::Reserved { data: false, code: 0 }
        );
        assert_eq!(MessageType::from_header(Header(0x9061)).to_string(), "SOURCE CAP EXTENDED");
        assert_eq!(MessageType::Control(ControlMessage::PsRdy).to_string(), "PS RDY");
        assert!(!MessageType::Control(ControlMessage::Accept).is_data());
    }

    #[test]
    fn test_source_capabilities() {
        let memo = CapabilityMemo::new();
        let words = [0x0001_912C, 0x9901_912C];
        assert_eq!(
            labels(SOURCE_CAP, &words, &memo),
            vec!["FIX:5.00V 3.00A", "VAR:5.0/20.0V 3.0A"]
        );
    }

    #[test]
    fn test_fixed_source_flags() {
        let memo = CapabilityMemo::new();
        // dual role power, usb comm, dual role data
        let word = 0x0001_912C | (1 << 29) | (1 << 26) | (1 << 25);
        assert_eq!(
            labels(SOURCE_CAP, &[word], &memo),
            vec!["FIX:5.00V 3.00A [dual_role_power] [usb_comm] [dual_role_data]"]
        );
    }

    #[test]
    fn test_fixed_sink_flags() {
        let memo = CapabilityMemo::new();
        let word = 0x0001_90FA | (1 << 28) | (2 << 23);
        assert_eq!(
            labels(SINK_CAP, &[word], &memo),
            vec!["FIX:5.00V 2.50A [higher_capability] [fr_swap 1.5A]"]
        );
    }

    #[test]
    fn test_battery_and_pps() {
        let memo = CapabilityMemo::new();
        // 5-20 V, 15 W
        let battery = (1 << 30) | (400 << 20) | (100 << 10) | 60;
        // 3.3-21 V, 3 A, power limited
        let pps = (3 << 30) | (1 << 27) | (210 << 17) | (33 << 8) | 60;
        assert_eq!(
            labels(SOURCE_CAP, &[battery, pps], &memo),
            vec!["BAT:5.0/20.0V 15.0W", "PPS:3.3/21.0V 3.00A [power_limited]"]
        );
        let reserved = (3u32 << 30) | (1 << 28);
        assert_eq!(labels(SOURCE_CAP, &[reserved], &memo), vec!["APDO?:d0000000"]);
    }

    #[test]
    fn test_request_follows_memo() {
        let mut memo = CapabilityMemo::new();
        let pps = (3 << 30) | (210 << 17) | (33 << 8) | 60;
        let battery = (1 << 30) | (400 << 20) | (100 << 10) | 60;
        let offer = PayloadInterpreter::new(&memo).interpret(SOURCE_CAP, &[0x0001_912C, pps, battery]);
        memo.record(&offer);
        assert_eq!(memo.kind_at(2), Some(PdoKind::Pps));

        let fixed = (1 << 28) | (300 << 10) | 300 | (1 << 25);
        let pps_req = (2 << 28) | (450 << 9) | 40;
        let battery_req = (3 << 28) | (60 << 10) | 60;
        assert_eq!(
            labels(REQUEST, &[fixed], &memo),
            vec!["REQ#1:3.00A/3.00A [usb_comm]"]
        );
        assert_eq!(labels(REQUEST, &[pps_req], &memo), vec!["REQ#2:9.00V 2.00A"]);
        assert_eq!(labels(REQUEST, &[battery_req], &memo), vec!["REQ#3:15.00W/15.00W"]);

        // Without an offer requests read as fixed
        memo.clear();
        assert_eq!(labels(REQUEST, &[pps_req], &memo), vec!["REQ#2:2.25A/0.40A"]);
    }

    #[test]
    fn test_memo_ignores_other_messages() {
        let mut memo = CapabilityMemo::new();
        let offer = PayloadInterpreter::new(&memo).interpret(SOURCE_CAP, &[0x0001_912C]);
        memo.record(&offer);
        let request = PayloadInterpreter::new(&memo).interpret(REQUEST, &[1 << 28]);
        memo.record(&request);
        assert_eq!(memo.kind_at(1), Some(PdoKind::Fixed));
        assert_eq!(memo.kind_at(0), None);
        assert_eq!(memo.kind_at(2), None);
    }

    #[test]
    fn test_vendor_defined() {
        let memo = CapabilityMemo::new();
        let vdm = MessageType::Data(DataMessage::VendorDefined);
        // ACK Discover Identity, structured v2.0, position 1
        let structured = 0xFF00_0000 | (1 << 15) | (1 << 13) | (1 << 8) | (1 << 6) | 1;
        assert_eq!(
            labels(vdm, &[structured, 0x1234_5678], &memo),
            vec!["ACK Disc Ident pos1 v2.0 SVID:ff00", "VDO:12345678"]
        );
        assert_eq!(
            labels(vdm, &[0xABCD_1234], &memo),
            vec!["unstruct [1234] SVID:abcd"]
        );
        let objects = PayloadInterpreter::new(&memo).interpret(vdm, &[structured, 0]);
        assert_eq!(objects[1].short_label(1), "VDM2");
    }

    #[test]
    fn test_bist() {
        let memo = CapabilityMemo::new();
        let bist = MessageType::Data(DataMessage::Bist);
        assert_eq!(labels(bist, &[5 << 28], &memo), vec!["BIST:Carrier Mode 2"]);
        assert_eq!(labels(bist, &[(2 << 28) | 42], &memo), vec!["BIST:Counter[=42]"]);
        assert_eq!(labels(bist, &[15 << 28], &memo), vec!["BIST:INVALID"]);
    }

    #[test]
    fn test_other_data_is_raw() {
        let memo = CapabilityMemo::new();
        let alert = MessageType::Data(DataMessage::Alert);
        let objects = PayloadInterpreter::new(&memo).interpret(alert, &[0xDEAD_BEEF]);
        assert_eq!(objects[0].label(), "RAW:deadbeef");
        assert_eq!(objects[0].short_label(0), "D1");
        let extended = PayloadInterpreter::new(&memo).interpret(MessageType::Extended(1), &[7]);
        assert_eq!(extended[0].label(), "RAW:00000007");
    }
}
