use std::{fmt, net::Ipv6Addr};

use crate::error::{ConnectorError, Result};

/// `scheme://[host][:port]` 形式的连接定位符。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接器只接受“纯 authority”定位符：应用给出的是一个端点，而不是资源；
///   因此 authority 之后出现的路径、查询、片段都说明调用方拼错了地址，应尽早拒绝。
/// - 空主机是监听模式的设计入口（`socket://:9000`），不是错误；是否合法由具体连接器判断。
///
/// ## 契约（What）
/// - `scheme` 统一转为小写；`host` 为空时返回 `None`；`port` 缺省时返回 `None`；
/// - IPv6 字面量必须用方括号包裹，`host()` 返回去掉括号的地址文本；
/// - **后置条件**：解析只在打开阶段执行一次，之后不可变；解析过程不触发任何 I/O。
///
/// ## 逻辑（How）
/// 1. 以首个 `:` 切出 scheme，剩余部分必须以 `//` 开头；
/// 2. authority 中出现 `/`、`?`、`#`、`;` 即判为格式错误；
/// 3. 方括号内按 IPv6 解析，否则以唯一的 `:` 切分主机与端口；
/// 4. 端口必须是 0..=65535 的十进制数。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    scheme: String,
    host: Option<String>,
    bracketed: bool,
    port: Option<u16>,
}

impl Locator {
    /// 解析定位符。
    pub fn parse(text: &str) -> Result<Self> {
        let Some((scheme, rest)) = text.split_once(':') else {
            return Err(ConnectorError::address(text, "missing scheme"));
        };
        if !is_valid_scheme(scheme) {
            return Err(ConnectorError::address(text, "invalid scheme"));
        }
        let Some(authority) = rest.strip_prefix("//") else {
            return Err(ConnectorError::address(
                text,
                "locator must begin with the `//` authority marker",
            ));
        };
        if authority.contains(['/', '?', '#', ';']) {
            return Err(ConnectorError::address(
                text,
                "only `host:port` may follow the authority marker",
            ));
        }

        let (host, bracketed, port_text) = split_authority(text, authority)?;
        let port = match port_text {
            None | Some("") => None,
            Some(digits) => Some(parse_port(text, digits)?),
        };

        Ok(Self {
            raw: text.to_owned(),
            scheme: scheme.to_ascii_lowercase(),
            host: (!host.is_empty()).then(|| host.to_owned()),
            bracketed,
            port,
        })
    }

    /// 要求定位符使用指定 scheme。
    pub fn expect_scheme(&self, scheme: &str) -> Result<()> {
        if self.scheme.eq_ignore_ascii_case(scheme) {
            Ok(())
        } else {
            Err(ConnectorError::address(
                self.raw.clone(),
                format!("expected scheme `{scheme}`, found `{}`", self.scheme),
            ))
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// 主机为空即为监听定位符。
    pub fn is_listening(&self) -> bool {
        self.host.is_none()
    }

    /// 返回 `//host:port` 形式的 authority，供权限检查拼接目标串。
    pub fn authority(&self) -> String {
        let host = match (&self.host, self.bracketed) {
            (Some(host), true) => format!("[{host}]"),
            (Some(host), false) => host.clone(),
            (None, _) => String::new(),
        };
        match self.port {
            Some(port) => format!("//{host}:{port}"),
            None => format!("//{host}"),
        }
    }

    /// 原始文本。
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.authority())
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn split_authority<'a>(text: &str, authority: &'a str) -> Result<(&'a str, bool, Option<&'a str>)> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let Some((literal, tail)) = bracketed.split_once(']') else {
            return Err(ConnectorError::address(text, "unterminated IPv6 literal"));
        };
        if literal.parse::<Ipv6Addr>().is_err() {
            return Err(ConnectorError::address(text, "invalid IPv6 literal"));
        }
        return match tail {
            "" => Ok((literal, true, None)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((literal, true, Some(port))),
                None => Err(ConnectorError::address(
                    text,
                    "unexpected characters after IPv6 literal",
                )),
            },
        };
    }

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if port.is_some_and(|port| port.contains(':')) {
        return Err(ConnectorError::address(
            text,
            "IPv6 literals must be enclosed in brackets",
        ));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(ConnectorError::address(text, "invalid host"));
    }
    Ok((host, false, port))
}

fn parse_port(text: &str, digits: &str) -> Result<u16> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConnectorError::address(text, "port must be decimal"));
    }
    digits
        .parse::<u16>()
        .map_err(|_| ConnectorError::address(text, "port out of range"))
}
