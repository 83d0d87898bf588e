// This file is part of Astarte.
//
// Copyright 2025, 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Rendezvous directives the device follows to find the Rendezvous Server.
//!
//! Each group of rendezvous instructions in the credential is turned into a
//! [`RendezvousDirective`] with the URLs to contact, the delay to apply after it and whether TO1
//! is bypassed.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use fdo_protocol::error::ErrorKind;
use fdo_protocol::v101::hash_hmac::Hash;
use fdo_protocol::v101::rendezvous_info::{
    RendezvousDirective as RawDirective, RendezvousInfo, RvProtocolValue, RvVariable,
};
use fdo_protocol::v101::{DnsAddress, IpAddress, Port};
use tracing::{debug, error, instrument, warn};
use url::{Host, Url};
use zeroize::Zeroizing;

use crate::Error;

/// Directive derived from a group of rendezvous instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousDirective {
    /// Candidate URLs, in order. Empty for a delay only directive.
    pub urls: Vec<Url>,
    /// Delay after trying the directive, zero if not set.
    pub delay: Duration,
    /// The URLs are Owner addresses and TO1 is skipped.
    pub bypass: bool,
}

/// Resolves DNS names.
pub trait Resolver: Send + Sync {
    /// Returns true if the name resolves to at least one address.
    fn resolves(&self, host: &str) -> impl Future<Output = bool> + Send;
}

/// Resolver of the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioResolver;

impl Resolver for TokioResolver {
    async fn resolves(&self, host: &str) -> bool {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(err) => {
                debug!(error = %err, host, "couldn't resolve host");

                false
            }
        }
    }
}

macro_rules! builder_replace_opt {
    ($this:ident, $field:ident, $value:expr) => {
        if $this.$field.replace($value).is_some() {
            return Err(fdo_protocol::Error::new(
                ErrorKind::Invalid,
                concat!(stringify!($field), " was overwritten"),
            ));
        }
    };
}

#[derive(Debug, Default)]
struct RvDevBuilder {
    ip: Option<IpAddress>,
    dns: Option<DnsAddress>,
    port: Option<Port>,
    protocol: Option<RvProtocolValue>,
    delay: Option<Duration>,
    bypass: bool,
}

impl RvDevBuilder {
    /// Collects the instructions of a group, returns [`None`] for owner only groups.
    fn try_from(value: &RawDirective) -> Result<Option<Self>, fdo_protocol::Error> {
        let mut this = RvDevBuilder::default();

        for instr in value {
            match instr.rv_variable() {
                RvVariable::DevOnly => {
                    debug!("device only instruction");
                }
                RvVariable::OwnerOnly => {
                    debug!("owner instruction skipping");

                    return Ok(None);
                }
                RvVariable::IPAddress => {
                    let ip: IpAddress = instr.value()?;

                    builder_replace_opt!(this, ip, ip);
                }
                RvVariable::DevPort => {
                    let port: Port = instr.value()?;

                    builder_replace_opt!(this, port, port);
                }
                RvVariable::OwnerPort => {
                    debug!("skipping owner port");
                }
                RvVariable::Dns => {
                    let dns: DnsAddress = instr.value()?;

                    builder_replace_opt!(this, dns, dns);
                }
                RvVariable::SvCertHash | RvVariable::ClCertHash => {
                    instr.value::<Hash>()?;

                    debug!("certificate hash is not checked");
                }
                RvVariable::UserInput => {
                    instr.value::<bool>()?;
                }
                RvVariable::WifiSsid => {
                    instr.value::<String>()?;
                }
                RvVariable::WifiPw => {
                    instr.value::<String>().map(Zeroizing::new)?;
                }
                RvVariable::Medium => {
                    instr.value::<u8>()?;
                }
                RvVariable::Protocol => {
                    let protocol: RvProtocolValue = instr.value()?;

                    builder_replace_opt!(this, protocol, protocol);
                }
                RvVariable::Delaysec => {
                    let delay: u32 = instr.value()?;

                    builder_replace_opt!(this, delay, Duration::from_secs(delay.into()));
                }
                RvVariable::Bypass => {
                    this.bypass = true;
                }
                RvVariable::ExtRV => {
                    warn!("external rendezvous not supported");

                    return Ok(None);
                }
            }
        }

        Ok(Some(this))
    }

    fn protocol(&self) -> RvProtocolValue {
        self.protocol.unwrap_or(RvProtocolValue::Rest)
    }

    /// Scheme of the URLs with its default port.
    ///
    /// `Rest`, also used when the protocol is missing, is the first supported one: https.
    fn scheme(&self) -> Option<(&'static str, Port)> {
        match self.protocol() {
            RvProtocolValue::Rest | RvProtocolValue::Https => Some(("https", 443)),
            RvProtocolValue::Http => Some(("http", 80)),
            protocol @ (RvProtocolValue::Tcp
            | RvProtocolValue::Tls
            | RvProtocolValue::CoapTcp
            | RvProtocolValue::CoapUdp) => {
                warn!(?protocol, "protocol not supported");

                None
            }
        }
    }

    async fn build<R>(self, resolver: &R) -> RendezvousDirective
    where
        R: Resolver,
    {
        let ip = self.ip.as_ref().and_then(|ip| {
            let addr = ip.to_ip_addr();

            if addr.is_none() {
                warn!(?ip, "invalid ip address");
            }

            addr
        });

        let dns = match &self.dns {
            Some(dns) => resolve(resolver, dns).await,
            None => None,
        };

        let urls = match self.scheme() {
            Some((scheme, default_port)) => {
                http_urls(scheme, self.port.unwrap_or(default_port), dns, ip)
            }
            None => Vec::new(),
        };

        RendezvousDirective {
            urls,
            delay: self.delay.unwrap_or_default(),
            bypass: self.bypass,
        }
    }
}

/// Returns the name if it resolves.
pub(crate) async fn resolve<'a, R>(resolver: &R, dns: &'a str) -> Option<&'a str>
where
    R: Resolver,
{
    if resolver.resolves(dns).await {
        Some(dns)
    } else {
        warn!(dns, "dns address is not resolvable");

        None
    }
}

/// Builds the URLs for a DNS name and an IP, DNS first.
///
/// The addresses must already be validated.
pub(crate) fn http_urls(scheme: &str, port: Port, dns: Option<&str>, ip: Option<IpAddr>) -> Vec<Url> {
    let mut urls = Vec::with_capacity(2);

    let hosts = dns
        .map(|dns| Host::Domain(dns.to_string()))
        .into_iter()
        .chain(ip.map(|ip| match ip {
            IpAddr::V4(ip) => Host::Ipv4(ip),
            IpAddr::V6(ip) => Host::Ipv6(ip),
        }));

    for host in hosts {
        match Url::parse(&format!("{scheme}://{host}:{port}")) {
            Ok(url) => urls.push(url),
            Err(err) => {
                error!(error = %err, %host, "couldn't parse URL");
            }
        }
    }

    urls
}

/// Parses the rendezvous info of the credential into the directives to follow.
///
/// Owner only groups and groups with invalid values are skipped. Fails with
/// [`Error::NoUsableDirectives`] when no directive is left.
#[instrument(skip_all)]
pub async fn parse<R>(
    rv_info: &RendezvousInfo,
    resolver: &R,
) -> Result<Vec<RendezvousDirective>, Error>
where
    R: Resolver,
{
    let mut directives = Vec::with_capacity(rv_info.len());

    for (i, group) in rv_info.iter().enumerate() {
        let builder = match RvDevBuilder::try_from(group) {
            Ok(Some(builder)) => builder,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, directive = i, "skipping invalid directive");

                continue;
            }
        };

        let directive = builder.build(resolver).await;

        debug!(directive = i, ?directive, "parsed directive");

        directives.push(directive);
    }

    if directives.is_empty() {
        error!("no rendezvous directive usable by the device");

        return Err(Error::NoUsableDirectives);
    }

    Ok(directives)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    use fdo_protocol::v101::rendezvous_info::RendezvousInstr;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Resolves only the given names.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct Hosts(pub(crate) HashSet<String>);

    impl Hosts {
        pub(crate) fn new<const N: usize>(names: [&str; N]) -> Self {
            Self(names.into_iter().map(str::to_string).collect())
        }
    }

    impl Resolver for Hosts {
        async fn resolves(&self, host: &str) -> bool {
            self.0.contains(host)
        }
    }

    fn urls(directive: &RendezvousDirective) -> Vec<&str> {
        directive.urls.iter().map(Url::as_str).collect()
    }

    #[tokio::test]
    async fn rest_uses_https() {
        let rv_info = vec![vec![
            RendezvousInstr::new(RvVariable::Dns, "rv.example.com").unwrap(),
            RendezvousInstr::new(
                RvVariable::IPAddress,
                &IpAddress::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            )
            .unwrap(),
            RendezvousInstr::new(RvVariable::DevPort, &8041u16).unwrap(),
        ]];

        let directives = parse(&rv_info, &Hosts::new(["rv.example.com"])).await.unwrap();

        assert_eq!(directives.len(), 1);
        assert_eq!(
            urls(&directives[0]),
            ["https://rv.example.com:8041/", "https://10.0.0.1:8041/"]
        );
        assert_eq!(directives[0].delay, Duration::ZERO);
        assert!(!directives[0].bypass);
    }

    #[tokio::test]
    async fn one_url_per_address() {
        let protocols = [
            None,
            Some(RvProtocolValue::Rest),
            Some(RvProtocolValue::Http),
            Some(RvProtocolValue::Https),
            Some(RvProtocolValue::Tcp),
            Some(RvProtocolValue::Tls),
            Some(RvProtocolValue::CoapTcp),
            Some(RvProtocolValue::CoapUdp),
        ];

        for protocol in protocols {
            for (dns, ip) in [(true, false), (false, true), (true, true)] {
                let mut group = Vec::new();
                if dns {
                    group.push(RendezvousInstr::new(RvVariable::Dns, "rv.example.com").unwrap());
                }
                if ip {
                    group.push(
                        RendezvousInstr::new(
                            RvVariable::IPAddress,
                            &IpAddress::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                        )
                        .unwrap(),
                    );
                }
                if let Some(protocol) = protocol {
                    group.push(
                        RendezvousInstr::new(RvVariable::Protocol, &u8::from(protocol)).unwrap(),
                    );
                }

                let directives = parse(&vec![group], &Hosts::new(["rv.example.com"]))
                    .await
                    .unwrap();

                let addresses = usize::from(dns) + usize::from(ip);
                assert_eq!(directives.len(), 1);
                assert!(
                    directives[0].urls.len() <= addresses,
                    "{protocol:?}: {:?}",
                    directives[0].urls
                );
            }
        }
    }

    #[tokio::test]
    async fn drops_unresolvable_and_invalid_addresses() {
        let rv_info = vec![vec![
            RendezvousInstr::new(RvVariable::Dns, "missing.example.com").unwrap(),
            RendezvousInstr::new(RvVariable::IPAddress, &IpAddress::from(vec![1, 2, 3])).unwrap(),
            RendezvousInstr::new(RvVariable::Protocol, &u8::from(RvProtocolValue::Http)).unwrap(),
            RendezvousInstr::new(RvVariable::Delaysec, &30u32).unwrap(),
        ]];

        let directives = parse(&rv_info, &Hosts::default()).await.unwrap();

        // delay only directive
        assert_eq!(
            directives,
            [RendezvousDirective {
                urls: Vec::new(),
                delay: Duration::from_secs(30),
                bypass: false,
            }]
        );
    }

    #[tokio::test]
    async fn default_ports_and_bypass() {
        let rv_info = vec![
            vec![
                RendezvousInstr::new(RvVariable::Dns, "owner.example.com").unwrap(),
                RendezvousInstr::new(RvVariable::Protocol, &u8::from(RvProtocolValue::Https))
                    .unwrap(),
                RendezvousInstr::flag(RvVariable::Bypass),
            ],
            vec![
                RendezvousInstr::new(RvVariable::Dns, "rv.example.com").unwrap(),
                RendezvousInstr::new(RvVariable::Protocol, &u8::from(RvProtocolValue::Http))
                    .unwrap(),
            ],
        ];

        let directives = parse(&rv_info, &Hosts::new(["owner.example.com", "rv.example.com"]))
            .await
            .unwrap();

        assert_eq!(urls(&directives[0]), ["https://owner.example.com/"]);
        assert!(directives[0].bypass);
        assert_eq!(urls(&directives[1]), ["http://rv.example.com/"]);
        assert!(!directives[1].bypass);
    }

    #[tokio::test]
    async fn skips_owner_only_and_invalid_groups() {
        let rv_info = vec![
            vec![
                RendezvousInstr::flag(RvVariable::OwnerOnly),
                RendezvousInstr::new(RvVariable::Dns, "owner.example.com").unwrap(),
            ],
            vec![RendezvousInstr::new(RvVariable::DevPort, "not a port").unwrap()],
            vec![
                RendezvousInstr::new(RvVariable::Dns, "rv.example.com").unwrap(),
                RendezvousInstr::new(RvVariable::Protocol, &u8::from(RvProtocolValue::Tcp))
                    .unwrap(),
            ],
        ];

        let directives = parse(&rv_info, &Hosts::new(["rv.example.com"])).await.unwrap();

        // the unsupported protocol still produces a directive, without URLs
        assert_eq!(directives.len(), 1);
        assert!(directives[0].urls.is_empty());
    }

    #[tokio::test]
    async fn empty_rv_info() {
        let err = parse(&Vec::new(), &Hosts::default()).await.unwrap_err();

        assert!(matches!(err, Error::NoUsableDirectives));

        let rv_info = vec![vec![RendezvousInstr::flag(RvVariable::OwnerOnly)]];
        let err = parse(&rv_info, &Hosts::default()).await.unwrap_err();

        assert!(matches!(err, Error::NoUsableDirectives));
    }

    #[test]
    fn ipv6_url() {
        let ip = "fd00::1".parse().unwrap();

        let urls = http_urls("https", 8043, None, Some(ip));

        assert_eq!(urls[0].as_str(), "https://[fd00::1]:8043/");
    }
}
