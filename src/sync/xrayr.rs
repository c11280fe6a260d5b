// XrayR 配置视图
//
// 把 XrayR 的 config.yml（PascalCase 键）投影成类型化的摘要，
// 并可以把摘要展开回文档用于推送。未出现的字段取 XrayR 的默认值。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::document::{Document, Scalar};

/// 配置校验错误，节点序号从 1 开始
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XrayrError {
    #[error("at least one node is required")]
    NoNodes,

    #[error("node {node}: {field} is required")]
    MissingField { node: usize, field: &'static str },

    #[error("node {node}: node id must be a positive integer")]
    InvalidNodeId { node: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct XrayrSummary {
    pub log: LogSummary,
    pub core: CoreSummary,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub level: String,
    pub access_path: String,
    pub error_path: String,
}

impl Default for LogSummary {
    fn default() -> Self {
        Self {
            level: "warning".to_string(),
            access_path: String::new(),
            error_path: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreSummary {
    pub dns_config_path: Option<String>,
    pub route_config_path: Option<String>,
    pub inbound_config_path: Option<String>,
    pub outbound_config_path: Option<String>,
    /// 原样保留的 ConnectionConfig
    pub connection_config: Option<Document>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub panel_type: String,
    pub api: ApiSummary,
    pub controller: ControllerSummary,
    pub cert: CertSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiSummary {
    pub api_host: String,
    pub api_key: String,
    pub node_id: i64,
    pub node_type: String,
    pub timeout: i64,
    pub enable_vless: bool,
    pub enable_xtls: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerSummary {
    pub listen_ip: String,
    pub send_ip: String,
    pub update_period: i64,
    pub enable_dns: bool,
    pub dns_type: String,
    pub enable_proxy_protocol: bool,
    pub auto_speed_limit: i64,
    pub speed_limit: i64,
    pub device_limit: i64,
    pub local_rule_list: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CertSummary {
    pub cert_mode: String,
    pub cert_domain: String,
    pub cert_file: String,
    pub key_file: String,
    pub provider: String,
    pub email: String,
    pub dns_env: BTreeMap<String, String>,
}

// ======================== 读取 ========================

/// 从文档中提取摘要
pub fn simplify(doc: &Document) -> XrayrSummary {
    let empty = Document::empty();

    let log = doc.get("Log").unwrap_or(&empty);
    let log = LogSummary {
        level: text_or(log, "Level", "warning"),
        access_path: text_or(log, "AccessPath", ""),
        error_path: text_or(log, "ErrorPath", ""),
    };

    let core = CoreSummary {
        dns_config_path: doc.get("DnsConfigPath").map(scalar_text),
        route_config_path: doc.get("RouteConfigPath").map(scalar_text),
        inbound_config_path: doc.get("InboundConfigPath").map(scalar_text),
        outbound_config_path: doc.get("OutboundConfigPath").map(scalar_text),
        connection_config: doc.get("ConnectionConfig").cloned(),
    };

    let nodes = doc
        .get("Nodes")
        .and_then(Document::as_sequence)
        .unwrap_or_default()
        .iter()
        .map(simplify_node)
        .collect();

    XrayrSummary { log, core, nodes }
}

fn simplify_node(node: &Document) -> NodeSummary {
    let empty = Document::empty();
    let api = node.get("ApiConfig").unwrap_or(&empty);
    let controller = node.get("ControllerConfig").unwrap_or(&empty);
    let cert = node.get("CertConfig").unwrap_or(&empty);

    NodeSummary {
        panel_type: text_or(node, "PanelType", ""),
        api: ApiSummary {
            api_host: text_or(api, "ApiHost", ""),
            api_key: text_or(api, "ApiKey", ""),
            node_id: int_or(api, "NodeID", 0),
            node_type: text_or(api, "NodeType", ""),
            timeout: int_or(api, "Timeout", 30),
            enable_vless: bool_or(api, "EnableVless", false),
            enable_xtls: bool_or(api, "EnableXTLS", false),
        },
        controller: ControllerSummary {
            listen_ip: text_or(controller, "ListenIP", "0.0.0.0"),
            send_ip: text_or(controller, "SendIP", "0.0.0.0"),
            update_period: int_or(controller, "UpdatePeriod", 60),
            enable_dns: bool_or(controller, "EnableDNS", false),
            dns_type: text_or(controller, "DNSType", ""),
            enable_proxy_protocol: bool_or(controller, "EnableProxyProtocol", false),
            auto_speed_limit: int_or(controller, "AutoSpeedLimit", 0),
            speed_limit: int_or(controller, "SpeedLimit", 0),
            device_limit: int_or(controller, "DeviceLimit", 0),
            local_rule_list: controller
                .get("LocalRuleList")
                .and_then(Document::as_sequence)
                .unwrap_or_default()
                .iter()
                .map(scalar_text)
                .collect(),
        },
        cert: CertSummary {
            cert_mode: text_or(cert, "CertMode", ""),
            cert_domain: text_or(cert, "CertDomain", ""),
            cert_file: text_or(cert, "CertFile", ""),
            key_file: text_or(cert, "KeyFile", ""),
            provider: text_or(cert, "Provider", ""),
            email: text_or(cert, "Email", ""),
            dns_env: match cert.get("DNSEnv") {
                Some(Document::Mapping(entries)) => entries
                    .iter()
                    .map(|(k, v)| (k.clone(), scalar_text(v)))
                    .collect(),
                _ => BTreeMap::new(),
            },
        },
    }
}

/// 标量转文本；YAML 中未加引号的数字也按文本读取
fn scalar_text(doc: &Document) -> String {
    match doc {
        Document::Scalar(Scalar::String(s)) => s.clone(),
        Document::Scalar(Scalar::Integer(n)) => n.to_string(),
        Document::Scalar(Scalar::Unsigned(n)) => n.to_string(),
        Document::Scalar(Scalar::Float(f)) => f.to_string(),
        Document::Scalar(Scalar::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn text_or(doc: &Document, key: &str, default: &str) -> String {
    match doc.get(key) {
        Some(Document::Scalar(Scalar::Null)) | None => default.to_string(),
        Some(value) => scalar_text(value),
    }
}

fn int_or(doc: &Document, key: &str, default: i64) -> i64 {
    match doc.get(key) {
        Some(Document::Scalar(Scalar::Integer(n))) => *n,
        Some(Document::Scalar(Scalar::String(s))) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn bool_or(doc: &Document, key: &str, default: bool) -> bool {
    doc.get(key).and_then(Document::as_bool).unwrap_or(default)
}

// ======================== 校验 ========================

/// 检查每个节点的 API 配置是否完整
pub fn validate(summary: &XrayrSummary) -> Result<(), XrayrError> {
    if summary.nodes.is_empty() {
        return Err(XrayrError::NoNodes);
    }

    for (index, node) in summary.nodes.iter().enumerate() {
        let node_no = index + 1;
        let api = &node.api;
        if api.api_host.trim().is_empty() {
            return Err(XrayrError::MissingField {
                node: node_no,
                field: "api host",
            });
        }
        if api.api_key.trim().is_empty() {
            return Err(XrayrError::MissingField {
                node: node_no,
                field: "api key",
            });
        }
        if api.node_id <= 0 {
            return Err(XrayrError::InvalidNodeId { node: node_no });
        }
        if api.node_type.trim().is_empty() {
            return Err(XrayrError::MissingField {
                node: node_no,
                field: "node type",
            });
        }
    }
    Ok(())
}

// ======================== 展开 ========================

fn string(value: &str) -> Document {
    Document::Scalar(Scalar::String(value.to_string()))
}

fn int(value: i64) -> Document {
    Document::Scalar(Scalar::Integer(value))
}

fn boolean(value: bool) -> Document {
    Document::Scalar(Scalar::Bool(value))
}

fn mapping(entries: Vec<(&str, Document)>) -> Document {
    Document::Mapping(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// 把摘要展开为 XrayR 文档（用于推送）
pub fn expand(summary: &XrayrSummary) -> Document {
    let mut entries = vec![(
        "Log",
        mapping(vec![
            ("Level", string(&summary.log.level)),
            ("AccessPath", string(&summary.log.access_path)),
            ("ErrorPath", string(&summary.log.error_path)),
        ]),
    )];

    let core = &summary.core;
    for (key, value) in [
        ("DnsConfigPath", &core.dns_config_path),
        ("RouteConfigPath", &core.route_config_path),
        ("InboundConfigPath", &core.inbound_config_path),
        ("OutboundConfigPath", &core.outbound_config_path),
    ] {
        if let Some(value) = value {
            entries.push((key, string(value)));
        }
    }
    if let Some(connection) = &core.connection_config {
        entries.push(("ConnectionConfig", connection.clone()));
    }

    entries.push((
        "Nodes",
        Document::Sequence(summary.nodes.iter().map(expand_node).collect()),
    ));
    mapping(entries)
}

fn expand_node(node: &NodeSummary) -> Document {
    let api = &node.api;
    let controller = &node.controller;
    let cert = &node.cert;

    mapping(vec![
        ("PanelType", string(&node.panel_type)),
        (
            "ApiConfig",
            mapping(vec![
                ("ApiHost", string(&api.api_host)),
                ("ApiKey", string(&api.api_key)),
                ("NodeID", int(api.node_id)),
                ("NodeType", string(&api.node_type)),
                ("Timeout", int(api.timeout)),
                ("EnableVless", boolean(api.enable_vless)),
                ("EnableXTLS", boolean(api.enable_xtls)),
            ]),
        ),
        (
            "ControllerConfig",
            mapping(vec![
                ("ListenIP", string(&controller.listen_ip)),
                ("SendIP", string(&controller.send_ip)),
                ("UpdatePeriod", int(controller.update_period)),
                ("EnableDNS", boolean(controller.enable_dns)),
                ("DNSType", string(&controller.dns_type)),
                ("EnableProxyProtocol", boolean(controller.enable_proxy_protocol)),
                ("AutoSpeedLimit", int(controller.auto_speed_limit)),
                ("SpeedLimit", int(controller.speed_limit)),
                ("DeviceLimit", int(controller.device_limit)),
                (
                    "LocalRuleList",
                    Document::Sequence(
                        controller.local_rule_list.iter().map(|r| string(r)).collect(),
                    ),
                ),
            ]),
        ),
        (
            "CertConfig",
            mapping(vec![
                ("CertMode", string(&cert.cert_mode)),
                ("CertDomain", string(&cert.cert_domain)),
                ("CertFile", string(&cert.cert_file)),
                ("KeyFile", string(&cert.key_file)),
                ("Provider", string(&cert.provider)),
                ("Email", string(&cert.email)),
                (
                    "DNSEnv",
                    Document::Mapping(
                        cert.dns_env
                            .iter()
                            .map(|(k, v)| (k.clone(), string(v)))
                            .collect(),
                    ),
                ),
            ]),
        ),
    ])
}

/// 新建同步目标时使用的默认模板
pub fn default_config() -> XrayrSummary {
    XrayrSummary {
        log: LogSummary::default(),
        core: CoreSummary {
            dns_config_path: Some(String::new()),
            route_config_path: Some(String::new()),
            inbound_config_path: Some(String::new()),
            outbound_config_path: Some(String::new()),
            connection_config: Some(mapping(vec![
                ("Handshake", int(4)),
                ("ConnIdle", int(30)),
                ("UplinkOnly", int(2)),
                ("DownlinkOnly", int(4)),
                ("BufferSize", int(64)),
            ])),
        },
        nodes: vec![NodeSummary {
            panel_type: "SSpanel".to_string(),
            api: ApiSummary {
                api_host: "http://127.0.0.1:667".to_string(),
                api_key: "123".to_string(),
                node_id: 1,
                node_type: "V2ray".to_string(),
                timeout: 30,
                enable_vless: false,
                enable_xtls: false,
            },
            controller: ControllerSummary {
                listen_ip: "0.0.0.0".to_string(),
                send_ip: "0.0.0.0".to_string(),
                update_period: 60,
                enable_dns: false,
                dns_type: String::new(),
                enable_proxy_protocol: false,
                auto_speed_limit: 0,
                speed_limit: 0,
                device_limit: 0,
                local_rule_list: Vec::new(),
            },
            cert: CertSummary {
                cert_mode: "none".to_string(),
                cert_domain: String::new(),
                cert_file: String::new(),
                key_file: String::new(),
                provider: String::new(),
                email: String::new(),
                dns_env: BTreeMap::new(),
            },
        }],
    }
}
