//! Install and configure instructions received from the controller

use super::AgentType;
use serde::{Deserialize, Serialize};

/// Agent kind and version an install refers to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub version: String,
}

/// Directive to make a specific agent version available and running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstallInstruction {
    pub agent: AgentRef,
    pub url: String,
    #[serde(default)]
    pub checksum: String,
    /// Path of the executable inside the downloaded archive
    pub exe: String,
}

/// Kind of change a configuration operation makes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigurationOpType {
    Create,
    Modify,
    Remove,
}

/// One fragment change within a configure instruction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationOp {
    /// Fragment id, unique within the agent kind
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: ConfigurationOpType,
    #[serde(default)]
    pub content: String,
}

impl ConfigurationOp {
    pub fn new(
        id: impl Into<String>,
        op_type: ConfigurationOpType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            op_type,
            content: content.into(),
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self::new(id, ConfigurationOpType::Remove, "")
    }
}

/// Ordered configuration changes for one agent kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureInstruction {
    pub agent_type: AgentType,
    pub operations: Vec<ConfigurationOp>,
}

/// Instruction streamed from the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Install(InstallInstruction),
    Configure(ConfigureInstruction),
}

impl Instruction {
    pub fn agent_type(&self) -> AgentType {
        match self {
            Instruction::Install(install) => install.agent.agent_type,
            Instruction::Configure(configure) => configure.agent_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_install_instruction() {
        let json = r#"{"install":{"agent":{"type":"FILEBEAT","version":"6.4.1"},
            "url":"https://example.com/filebeat.tar.gz","exe":"filebeat-6.4.1/filebeat"}}"#;

        let instruction: Instruction = serde_json::from_str(json).unwrap();
        match instruction {
            Instruction::Install(install) => {
                assert_eq!(install.agent.agent_type, AgentType::Filebeat);
                assert_eq!(install.agent.version, "6.4.1");
                assert_eq!(install.exe, "filebeat-6.4.1/filebeat");
                assert!(install.checksum.is_empty());
            }
            other => panic!("Expected install, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_configure_instruction() {
        let json = r#"{"configure":{"agentType":"TELEGRAF","operations":[
            {"id":"a-b-c","type":"CREATE","content":"hello"},
            {"id":"d-e-f","type":"REMOVE"}]}}"#;

        let instruction: Instruction = serde_json::from_str(json).unwrap();
        assert_eq!(instruction.agent_type(), AgentType::Telegraf);

        if let Instruction::Configure(configure) = instruction {
            assert_eq!(configure.operations.len(), 2);
            assert_eq!(configure.operations[0].op_type, ConfigurationOpType::Create);
            assert_eq!(configure.operations[1], ConfigurationOp::remove("d-e-f"));
        } else {
            panic!("Expected configure instruction");
        }
    }

    #[test]
    fn test_unknown_agent_type_is_rejected() {
        let json = r#"{"configure":{"agentType":"COLLECTD","operations":[]}}"#;
        assert!(serde_json::from_str::<Instruction>(json).is_err());
    }
}
