//! ゲートウェイから届くイベントのデコード
//!
//! `{"cmd": ..., "data": ...}` 形式のペイロードを既知の種類に振り分ける。
//! 未知のコマンドは `Unrecognized` として残し、呼び出し側で無視する。

use serde::Deserialize;

use crate::models::{
    DanmakuData, GiftComboInfo, GiftData, GuardData, LiveStatusData, RoomEnterData,
    SuperChatData, UserData,
};

pub const CMD_DANMAKU: &str = "LIVE_OPEN_PLATFORM_DM";
pub const CMD_SUPER_CHAT: &str = "LIVE_OPEN_PLATFORM_SUPER_CHAT";
pub const CMD_GIFT: &str = "LIVE_OPEN_PLATFORM_SEND_GIFT";
pub const CMD_GUARD: &str = "LIVE_OPEN_PLATFORM_GUARD";
pub const CMD_ROOM_ENTER: &str = "LIVE_OPEN_PLATFORM_LIVE_ROOM_ENTER";
pub const CMD_LIVE_START: &str = "LIVE_OPEN_PLATFORM_LIVE_START";
pub const CMD_LIVE_END: &str = "LIVE_OPEN_PLATFORM_LIVE_END";

/// 視聴者イベント
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Danmaku(DanmakuData),
    SuperChat(SuperChatData),
    Gift(GiftData),
    Guard(GuardData),
    RoomEnter(RoomEnterData),
    LiveStart(LiveStatusData),
    LiveEnd(LiveStatusData),
    Unrecognized { cmd: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    cmd: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawGift {
    #[serde(flatten)]
    user: UserData,
    gift_id: i64,
    gift_name: String,
    gift_num: u32,
    /// 1/1000元単位
    price: u64,
    paid: bool,
    timestamp: i64,
    msg_id: String,
    gift_icon: String,
    combo_gift: bool,
    combo_info: Option<GiftComboInfo>,
}

impl Default for RawGift {
    fn default() -> Self {
        Self {
            user: UserData::default(),
            gift_id: 0,
            gift_name: String::new(),
            gift_num: 1,
            price: 0,
            paid: false,
            timestamp: 0,
            msg_id: String::new(),
            gift_icon: String::new(),
            combo_gift: false,
            combo_info: None,
        }
    }
}

impl From<RawGift> for GiftData {
    fn from(raw: RawGift) -> Self {
        Self {
            user: raw.user,
            gift_id: raw.gift_id,
            gift_name: raw.gift_name,
            gift_num: raw.gift_num,
            rmb: raw.price as f64 / 1000.0,
            paid: raw.paid,
            timestamp: raw.timestamp,
            msg_id: raw.msg_id,
            gift_icon: raw.gift_icon,
            combo_gift: raw.combo_gift,
            combo_info: raw.combo_info,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGuardUser {
    open_id: String,
    uname: String,
    uface: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGuard {
    user_info: RawGuardUser,
    guard_level: i32,
    guard_num: u32,
    guard_unit: String,
    fans_medal_level: i32,
    fans_medal_name: String,
    fans_medal_wearing_status: bool,
    msg_id: String,
    timestamp: i64,
}

impl From<RawGuard> for GuardData {
    fn from(raw: RawGuard) -> Self {
        Self {
            user: UserData {
                open_id: raw.user_info.open_id,
                uname: raw.user_info.uname,
                uface: raw.user_info.uface,
                fans_medal_level: raw.fans_medal_level,
                fans_medal_name: raw.fans_medal_name,
                fans_medal_wearing_status: raw.fans_medal_wearing_status,
                guard_level: raw.guard_level,
            },
            guard_num: raw.guard_num,
            guard_unit: raw.guard_unit,
            msg_id: raw.msg_id,
            timestamp: raw.timestamp,
        }
    }
}

impl LiveEvent {
    /// ペイロードをデコード
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let Envelope { cmd, data } = serde_json::from_slice(payload)?;

        let event = match cmd.as_str() {
            CMD_DANMAKU => LiveEvent::Danmaku(serde_json::from_value(data)?),
            CMD_SUPER_CHAT => LiveEvent::SuperChat(serde_json::from_value(data)?),
            CMD_GIFT => LiveEvent::Gift(serde_json::from_value::<RawGift>(data)?.into()),
            CMD_GUARD => LiveEvent::Guard(serde_json::from_value::<RawGuard>(data)?.into()),
            CMD_ROOM_ENTER => LiveEvent::RoomEnter(serde_json::from_value(data)?),
            CMD_LIVE_START => LiveEvent::LiveStart(serde_json::from_value(data)?),
            CMD_LIVE_END => LiveEvent::LiveEnd(serde_json::from_value(data)?),
            _ => LiveEvent::Unrecognized { cmd },
        };
        Ok(event)
    }

    /// ログ用の種類名
    pub fn kind(&self) -> &str {
        match self {
            LiveEvent::Danmaku(_) => "danmaku",
            LiveEvent::SuperChat(_) => "super_chat",
            LiveEvent::Gift(_) => "gift",
            LiveEvent::Guard(_) => "guard",
            LiveEvent::RoomEnter(_) => "room_enter",
            LiveEvent::LiveStart(_) => "live_start",
            LiveEvent::LiveEnd(_) => "live_end",
            LiveEvent::Unrecognized { cmd } => cmd,
        }
    }
}
