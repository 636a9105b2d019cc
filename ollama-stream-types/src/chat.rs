use serde::{Deserialize, Serialize};

/// 消息角色。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 消息状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Complete,
    /// 正在接收流式输出。
    Streaming,
    /// 用户中途停止。
    Stopped,
    /// 生成失败，已收到的部分内容保留。
    Failed,
}

/// 会话中的一条消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    /// 创建用户消息。
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            status: MessageStatus::Complete,
        }
    }

    /// 创建助手消息。
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            status: MessageStatus::Complete,
        }
    }

    /// 创建等待流式填充的空助手消息。
    #[must_use]
    pub const fn pending_assistant() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
        }
    }
}
