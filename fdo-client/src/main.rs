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

//! Initializes and onboards the device with the FIDO Device Onboard protocol.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::{WrapErr, bail, eyre};
use fdo_onboard::client::http::{HttpTransport, tls_config};
use fdo_onboard::config::{ModuleDir, ModulesConfig, SUPPORTED_CIPHERS, SUPPORTED_KEX};
use fdo_onboard::crypto::DeviceSecrets;
use fdo_onboard::crypto::software::SoftwareCrypto;
use fdo_onboard::di::{Manufacturing, device_initialize};
use fdo_onboard::directive::TokioResolver;
use fdo_onboard::fdo_protocol::v101::device_credentials::DeviceCredential;
use fdo_onboard::fdo_protocol::v101::key_exchange::{CipherSuite, KexSuiteName};
use fdo_onboard::fdo_protocol::v101::public_key::PkType;
use fdo_onboard::onboard::{Onboarded, onboard};
use fdo_onboard::srv_info::ServiceInfoRegistry;
use fdo_onboard::storage::FileStore;
use fdo_onboard::url::Url;
use fdo_onboard::{CancellationToken, CredentialStore, Crypto, Ctx, Error, OnboardConfig};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Enables the debug logs
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Gets the device credential from the manufacturer
    DeviceInit(DeviceInitArgs),
    /// Looks for the owner and transfers the ownership of the device
    Onboard(OnboardArgs),
    /// Prints the stored credential, without the secrets
    Print(StoreArgs),
}

#[derive(Debug, Clone, Args)]
struct StoreArgs {
    /// File with the device credential
    #[arg(long, default_value = "cred.bin")]
    blob: PathBuf,

    /// Keeps the device key in the TPM and the credential in its NV indices, with the TCTI
    /// connection string (e.g. `mssim:host=localhost,port=2321`)
    #[cfg(feature = "tpm")]
    #[arg(
        long,
        conflicts_with = "blob",
        num_args = 0..=1,
        default_missing_value = fdo_onboard::crypto::tpm::TPM_CONNECTION
    )]
    tpm: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct TlsArgs {
    /// Skips the validation of the server certificates
    #[arg(long)]
    insecure_tls: bool,

    /// PEM files with the CA certificates of the servers
    #[arg(long)]
    ca_cert: Vec<PathBuf>,
}

impl TlsArgs {
    fn transport(&self) -> eyre::Result<(HttpTransport, rustls::ClientConfig)> {
        let tls = tls_config(&self.ca_cert, self.insecure_tls)?;
        let transport = HttpTransport::create(tls.clone())?;

        Ok((transport, tls))
    }
}

/// Key generated for the device credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DiKey {
    /// ECDSA P-256
    Ec256,
    /// ECDSA P-384
    Ec384,
}

impl From<DiKey> for PkType {
    fn from(value: DiKey) -> Self {
        match value {
            DiKey::Ec256 => PkType::Secp256R1,
            DiKey::Ec384 => PkType::Secp384R1,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct DeviceInitArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    tls: TlsArgs,

    /// Base URL of the manufacturer server
    #[arg(long = "di", default_value = "http://127.0.0.1:8080")]
    url: Url,

    /// Key for the device credential
    #[arg(long = "di-key", value_enum, default_value_t = DiKey::Ec384)]
    key: DiKey,

    /// Device info for the credential, the host name is used if missing
    #[arg(long = "di-device-info")]
    device_info: Option<String>,

    /// Network interface whose MAC address is used as the device info (e.g. `eth0`)
    #[arg(long = "di-device-info-mac", conflicts_with = "device_info")]
    device_info_mac: Option<String>,

    /// Serial number of the device, random if missing
    #[arg(long)]
    serial: Option<String>,
}

impl DeviceInitArgs {
    async fn manufacturing(&self) -> eyre::Result<Manufacturing> {
        let device_info = match (&self.device_info, &self.device_info_mac) {
            (Some(info), _) => info.clone(),
            (None, Some(iface)) => {
                let path = format!("/sys/class/net/{iface}/address");

                read_trimmed(&path)
                    .await
                    .wrap_err_with(|| format!("couldn't read the MAC address of {iface}"))?
            }
            (None, None) => read_trimmed("/proc/sys/kernel/hostname")
                .await
                .wrap_err("couldn't read the host name")?,
        };

        if device_info.is_empty() {
            bail!("the device info is empty");
        }

        let serial_no = self
            .serial
            .clone()
            .unwrap_or_else(|| (rand::random::<u64>() >> 1).to_string());

        Ok(Manufacturing {
            serial_no,
            device_info,
        })
    }

    async fn run<S, C>(
        &self,
        mut store: S,
        crypto: &C,
        secrets: DeviceSecrets,
    ) -> eyre::Result<()>
    where
        S: CredentialStore,
        C: Crypto,
    {
        let mfg = self.manufacturing().await?;
        let (mut transport, _) = self.tls.transport()?;

        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));

        let credential =
            device_initialize(crypto, secrets, &mut transport, &self.url, &mfg, &cancel)
                .await
                .wrap_err("device initialization failed")?;

        store
            .save(&credential)
            .await
            .wrap_err("couldn't store the device credential")?;

        info!(guid = %credential.dc_guid, serial_no = mfg.serial_no, "device initialized");

        Ok(())
    }
}

async fn read_trimmed(path: &str) -> eyre::Result<String> {
    let content = tokio::fs::read_to_string(path).await?;

    Ok(content.trim().to_string())
}

/// Refuses to overwrite a credential, even a corrupted one.
async fn ensure_uninitialized<S>(store: &mut S) -> eyre::Result<()>
where
    S: CredentialStore,
{
    match store.load().await {
        Err(Error::NotInitialized) => Ok(()),
        Ok(credential) => bail!(
            "device already initialized with GUID {}",
            credential.dc_guid
        ),
        Err(err) => Err(err).wrap_err("couldn't check the stored credential"),
    }
}

#[derive(Debug, Clone, Args)]
struct OnboardArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    tls: TlsArgs,

    /// Key exchange suite
    #[arg(long, value_parser = kex_parser())]
    kex: KexSuiteName,

    /// Cipher suite
    #[arg(long, default_value = "A128GCM", value_parser = cipher_parser())]
    cipher: CipherSuite,

    /// Accepts an owner keeping the current credential
    #[arg(long)]
    allow_credential_reuse: bool,

    /// Onboards a device that was already onboarded
    #[arg(long)]
    resale: bool,

    /// Seconds to wait between TO2 attempts on different owners
    #[arg(long, default_value_t = 0)]
    to2_retry_delay: u64,

    /// Maximum service info size the device can receive
    #[arg(long = "max-serviceinfo-size", default_value_t = 1300)]
    max_service_info_size: u16,

    /// Directory of the `fdo.download` files
    #[arg(long)]
    download: Option<PathBuf>,

    /// Directory of the `fdo.wget` files
    #[arg(long)]
    wget_dir: Option<PathBuf>,

    /// Absolute directory for the relative paths of `fdo.upload`
    #[arg(long)]
    default_working_dir: Option<PathBuf>,

    /// Registers `fdo.command`, logging the commands instead of running them
    #[arg(long, conflicts_with = "run_commands")]
    echo_commands: bool,

    /// Registers `fdo.command`, running the commands in the default working directory
    #[arg(long)]
    run_commands: bool,

    /// Registers the `fido_alliance` interop test module
    #[arg(long)]
    enable_interop_test: bool,
}

fn kex_parser() -> impl TypedValueParser<Value = KexSuiteName> {
    PossibleValuesParser::new(SUPPORTED_KEX.iter().map(KexSuiteName::as_str))
        .try_map(|name| name.parse::<KexSuiteName>())
}

fn cipher_parser() -> impl TypedValueParser<Value = CipherSuite> {
    PossibleValuesParser::new(SUPPORTED_CIPHERS.iter().map(CipherSuite::as_str))
        .try_map(|name| name.parse::<CipherSuite>())
}

impl OnboardArgs {
    fn config(&self) -> OnboardConfig {
        let mut config = OnboardConfig::new(self.kex);

        config.cipher = self.cipher;
        config.allow_credential_reuse = self.allow_credential_reuse;
        config.resale = self.resale;
        config.to2_retry_delay = Duration::from_secs(self.to2_retry_delay);
        config.max_service_info_size = self.max_service_info_size;
        config.insecure_tls = self.tls.insecure_tls;
        config.modules = ModulesConfig {
            download: ModuleDir::from(self.download.clone()),
            wget: ModuleDir::from(self.wget_dir.clone()),
            working_dir: ModuleDir::from(self.default_working_dir.clone()),
            echo_commands: self.echo_commands,
            run_commands: self.run_commands,
            interop: self.enable_interop_test,
        };

        config
    }

    async fn run<S, C>(
        &self,
        mut store: S,
        credential: &DeviceCredential,
        crypto: &C,
    ) -> eyre::Result<()>
    where
        S: CredentialStore,
        C: Crypto,
    {
        let config = self.config();
        config.validate().wrap_err("invalid configuration")?;

        let (mut transport, tls) = self.tls.transport()?;

        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .build()
            .wrap_err("couldn't build the HTTP client")?;

        let mut registry = ServiceInfoRegistry::builtin(&config.modules, http)?;

        let cancel = CancellationToken::new();
        tokio::spawn(cancel_on_signal(cancel.clone()));

        let ctx = Ctx::new(crypto, &TokioResolver, &config, cancel);

        let onboarded = onboard(&ctx, &mut store, credential, &mut transport, &mut registry)
            .await
            .wrap_err("onboarding failed")?;

        match onboarded {
            Onboarded::Replaced | Onboarded::Reused => info!(?onboarded, "device onboarded"),
            Onboarded::AlreadyOnboarded => info!("device already onboarded, nothing to do"),
        }

        Ok(())
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupted, canceling the onboarding");

            cancel.cancel();
        }
        Err(err) => {
            warn!(error = %err, "couldn't listen for the interrupt signal");
        }
    }
}

async fn load<S>(store: &mut S) -> eyre::Result<DeviceCredential>
where
    S: CredentialStore,
{
    store
        .load()
        .await
        .wrap_err("couldn't load the device credential")
}

async fn print<S>(mut store: S) -> eyre::Result<()>
where
    S: CredentialStore,
{
    let credential = load(&mut store).await?;

    println!("{credential:#?}");

    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    color_eyre::install()?;

    let level = if cli.debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.parse()?)
                .from_env_lossy(),
        )
        .try_init()?;

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| eyre!("couldn't install crypto provider"))?;

    match cli.command {
        Command::DeviceInit(args) => match open_store(&args.store).await? {
            Store::File(mut store) => {
                ensure_uninitialized(&mut store).await?;

                let (crypto, secrets) = SoftwareCrypto::generate(args.key.into())
                    .wrap_err("couldn't generate the device key")?;

                args.run(store, &crypto, secrets).await
            }
            #[cfg(feature = "tpm")]
            Store::Tpm { mut store, tpm } => {
                use fdo_onboard::crypto::tpm::TpmCrypto;

                ensure_uninitialized(&mut store).await?;

                let (crypto, secrets) = TpmCrypto::generate(tpm, args.key.into())
                    .await
                    .wrap_err("couldn't generate the device key in the TPM")?;

                args.run(store, &crypto, secrets).await
            }
        },
        Command::Onboard(args) => match open_store(&args.store).await? {
            Store::File(mut store) => {
                let credential = load(&mut store).await?;
                let crypto = SoftwareCrypto::from_credential(&credential)
                    .wrap_err("couldn't read the device key")?;

                args.run(store, &credential, &crypto).await
            }
            #[cfg(feature = "tpm")]
            Store::Tpm { mut store, tpm } => {
                use fdo_onboard::crypto::tpm::TpmCrypto;

                let credential = load(&mut store).await?;
                let crypto = TpmCrypto::from_credential(tpm, &credential)
                    .wrap_err("couldn't load the device key in the TPM")?;

                args.run(store, &credential, &crypto).await
            }
        },
        Command::Print(store) => match open_store(&store).await? {
            Store::File(store) => print(store).await,
            #[cfg(feature = "tpm")]
            Store::Tpm { store, .. } => print(store).await,
        },
    }
}

enum Store {
    File(FileStore),
    #[cfg(feature = "tpm")]
    Tpm {
        store: fdo_onboard::storage::NvStore<fdo_onboard::storage::tpm::TpmNvRam>,
        tpm: fdo_onboard::crypto::tpm::Tpm,
    },
}

async fn open_store(args: &StoreArgs) -> eyre::Result<Store> {
    #[cfg(feature = "tpm")]
    if let Some(connection) = &args.tpm {
        use fdo_onboard::crypto::tpm::Tpm;
        use fdo_onboard::storage::NvStore;
        use fdo_onboard::storage::tpm::TpmNvRam;

        let tpm = Tpm::with_connection(connection)
            .await
            .wrap_err("couldn't connect to the TPM")?;

        let store = NvStore::new(TpmNvRam::new(tpm.clone()));

        return Ok(Store::Tpm { store, tpm });
    }

    Ok(Store::File(FileStore::new(&args.blob)))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn only_supported_suites() {
        let cli = Cli::try_parse_from([
            "fdo-client", "onboard", "--kex", "ECDH384", "--cipher", "A256GCM",
        ])
        .unwrap();

        let Command::Onboard(args) = cli.command else {
            panic!("expected the onboard command");
        };
        assert_eq!(args.kex, KexSuiteName::Ecdh384);
        assert_eq!(args.cipher, CipherSuite::A256Gcm);

        for args in [
            ["fdo-client", "onboard", "--kex", "DHKEXid14", "--cipher", "A128GCM"],
            ["fdo-client", "onboard", "--kex", "ECDH256", "--cipher", "COSEAES128CBC"],
        ] {
            let err = Cli::try_parse_from(args).unwrap_err();

            assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
        }
    }

    #[test]
    fn device_init_defaults() {
        let cli = Cli::try_parse_from(["fdo-client", "device-init"]).unwrap();

        let Command::DeviceInit(args) = cli.command else {
            panic!("expected the device-init command");
        };
        assert_eq!(args.url.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(args.key, DiKey::Ec384);
        assert_eq!(PkType::from(args.key), PkType::Secp384R1);
        assert_eq!(args.store.blob, PathBuf::from("cred.bin"));
        assert!(args.device_info.is_none());
        assert!(args.serial.is_none());
    }

    #[test]
    fn device_init_options() {
        let cli = Cli::try_parse_from([
            "fdo-client",
            "device-init",
            "--di",
            "https://mfg.example.com:8038",
            "--di-key",
            "ec256",
            "--di-device-info",
            "gotest",
            "--serial",
            "42",
        ])
        .unwrap();

        let Command::DeviceInit(args) = cli.command else {
            panic!("expected the device-init command");
        };
        assert_eq!(args.url.host_str(), Some("mfg.example.com"));
        assert_eq!(PkType::from(args.key), PkType::Secp256R1);
        assert_eq!(args.device_info.as_deref(), Some("gotest"));
        assert_eq!(args.serial.as_deref(), Some("42"));
    }

    #[test]
    fn device_init_rejects() {
        let err = Cli::try_parse_from(["fdo-client", "device-init", "--di-key", "rsa2048"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);

        let err = Cli::try_parse_from([
            "fdo-client",
            "device-init",
            "--di-device-info",
            "gotest",
            "--di-device-info-mac",
            "eth0",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[tokio::test]
    async fn manufacturing_with_device_info() {
        let cli = Cli::try_parse_from([
            "fdo-client",
            "device-init",
            "--di-device-info",
            "gotest",
        ])
        .unwrap();

        let Command::DeviceInit(args) = cli.command else {
            panic!("expected the device-init command");
        };
        let mfg = args.manufacturing().await.unwrap();

        assert_eq!(mfg.device_info, "gotest");
        assert!(mfg.serial_no.parse::<i64>().is_ok(), "{}", mfg.serial_no);
    }

    #[tokio::test]
    async fn refuses_initialized_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("cred.bin"));

        ensure_uninitialized(&mut store).await.unwrap();

        let (_, secrets) = SoftwareCrypto::generate(PkType::Secp256R1).unwrap();
        let credential = DeviceCredential {
            dc_prot_ver: 101,
            dc_guid: fdo_onboard::fdo_protocol::v101::Guid::new([1; 16]),
            dc_rv_info: Vec::new(),
            dc_device_info: "gotest".to_string(),
            dc_pub_key_hash: fdo_onboard::crypto::hash(
                fdo_onboard::fdo_protocol::v101::hash_hmac::Hashtype::Sha256,
                b"manufacturer",
            )
            .unwrap(),
            dc_state: fdo_onboard::fdo_protocol::v101::device_credentials::DeviceState::PreTo1,
            dc_private_key: secrets.private_key,
            dc_hmac_secret: secrets.hmac_secret,
            dc_hmac_secret_384: secrets.hmac_secret_384,
        };
        store.save(&credential).await.unwrap();

        let err = ensure_uninitialized(&mut store).await.unwrap_err();
        assert!(err.to_string().contains("already initialized"), "{err}");
    }
}
