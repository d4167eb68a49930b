use serde::{Deserialize, Serialize};

/// 視聴者情報（各イベントに共通）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct UserData {
    pub open_id: String,
    pub uname: String,
    pub uface: String,
    pub fans_medal_level: i32,
    pub fans_medal_name: String,
    pub fans_medal_wearing_status: bool,
    pub guard_level: i32,
}

impl UserData {
    /// 大航海（舰长以上）に加入しているか
    pub fn is_guard(&self) -> bool {
        self.guard_level > 0
    }

    /// 指定名のファンバッジを指定レベル以上で着用しているか
    pub fn wears_medal(&self, medal_name: &str, min_level: i32) -> bool {
        self.fans_medal_wearing_status
            && self.fans_medal_name == medal_name
            && self.fans_medal_level >= min_level
    }
}

/// チャット（弹幕）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DanmakuData {
    #[serde(flatten)]
    pub user: UserData,
    pub msg: String,
    pub msg_id: String,
    pub timestamp: i64,
    pub emoji_img_url: String,
    pub dm_type: i32,
}

/// スーパーチャット（醒目留言）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SuperChatData {
    #[serde(flatten)]
    pub user: UserData,
    #[serde(alias = "message")]
    pub msg: String,
    pub msg_id: String,
    pub message_id: i64,
    pub rmb: f64,
    pub timestamp: i64,
    pub start_time: i64,
    pub end_time: i64,
}

/// ギフト連撃情報（プラットフォーム側の集計値）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GiftComboInfo {
    pub combo_base_num: i64,
    pub combo_count: i64,
    pub combo_id: String,
    pub combo_timeout: i64,
}

/// ギフト
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GiftData {
    #[serde(flatten)]
    pub user: UserData,
    pub gift_id: i64,
    pub gift_name: String,
    pub gift_num: u32,
    /// 金額（元）
    pub rmb: f64,
    pub paid: bool,
    pub timestamp: i64,
    pub msg_id: String,
    pub gift_icon: String,
    pub combo_gift: bool,
    pub combo_info: Option<GiftComboInfo>,
}

/// 大航海購入
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GuardData {
    #[serde(flatten)]
    pub user: UserData,
    pub guard_num: u32,
    pub guard_unit: String,
    pub msg_id: String,
    pub timestamp: i64,
}

/// 入室通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RoomEnterData {
    #[serde(flatten)]
    pub user: UserData,
    pub timestamp: i64,
}

/// 配信開始・終了
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LiveStatusData {
    pub room_id: i64,
    pub open_id: String,
    pub timestamp: i64,
    pub area_name: String,
    pub title: String,
}

/// 配信ルーム情報
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RoomData {
    pub room_id: i64,
    pub uname: String,
    pub uface: String,
}

/// クライアントが切り替えられる機能設定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FeatureConfig {
    /// AI返信を無効化
    pub disable_llm: bool,
}

/// 大航海レベルの表示名
pub fn guard_level_name(guard_level: i32) -> &'static str {
    match guard_level {
        1 => "总督",
        2 => "提督",
        _ => "舰长",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medal_eligibility() {
        let user = UserData {
            fans_medal_level: 12,
            fans_medal_name: "巫女酱".to_string(),
            fans_medal_wearing_status: true,
            ..Default::default()
        };
        assert!(user.wears_medal("巫女酱", 10));
        assert!(!user.wears_medal("巫女酱", 15));
        assert!(!user.wears_medal("别的牌子", 10));

        let not_wearing = UserData {
            fans_medal_wearing_status: false,
            ..user
        };
        assert!(!not_wearing.wears_medal("巫女酱", 10));
    }

    #[test]
    fn test_guard_level_name() {
        assert_eq!(guard_level_name(1), "总督");
        assert_eq!(guard_level_name(2), "提督");
        assert_eq!(guard_level_name(3), "舰长");
        assert_eq!(guard_level_name(99), "舰长");
    }

    #[test]
    fn test_danmaku_serializes_flat() {
        let data = DanmakuData {
            user: UserData {
                open_id: "u1".to_string(),
                uname: "青云".to_string(),
                ..Default::default()
            },
            msg: "你好".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["open_id"], "u1");
        assert_eq!(json["uname"], "青云");
        assert_eq!(json["msg"], "你好");
    }
}
