//! End-to-end tests of the deployment pipeline against the in-memory chain.
//!
//! Each test builds a throwaway workspace (artifacts, seed address books, manifest) in a
//! temporary directory and runs the manifest with [`Sequence`].
//! Run with: cargo test --test deployment

use std::{collections::BTreeSet, path::Path};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, address},
};
use anyhow::{Context, Result};
use stakeroute_deploy::{
    AddressStore, CallOutcome, ChainClient, Config, ContractSpec, DeployReport,
    DeploymentRecords, Manifest, NetworkConfig, Outcome, Sequence, Source,
    testing::{DEV_ACCOUNT, MockChain},
};
use tempdir::TempDir;

const GOERLI_WETH: Address = address!("B4FBF271143F4FBf7B91A5ded31805e42b2208d6");
const RECORDED_WETH: Address = address!("00000000000000000000000000000000000000e1");

const MANIFEST: &str = r#"
[[steps]]
order = 0
name = "uniswap-v3"
tags = ["uniswap"]

[[steps.contracts]]
symbol = "wrappedNative"
name = "WETH"

[[steps.contracts]]
symbol = "uniswapV3Factory"
name = "UniswapV3Factory"

[[steps.contracts]]
symbol = "nftDescriptor"
name = "NFTDescriptor"

[[steps.contracts]]
symbol = "uniswapV3NftDescriptor"
name = "NonfungibleTokenPositionDescriptor"
args = ["@wrappedNative", "bytes32:ETH"]
libraries = { NFTDescriptor = "nftDescriptor" }

[[steps.contracts]]
symbol = "uniswapV3NftManager"
name = "NonfungiblePositionManager"
args = ["@uniswapV3Factory", "@wrappedNative", "@uniswapV3NftDescriptor"]

[[steps]]
order = 1
name = "tokens"
tags = ["tokens"]

[[steps.contracts]]
symbol = "baseToken"
name = "CHESS"
artifact = "TestERC20"
args = ["string:Chess", "string:CHESS", "deployer"]

[[steps]]
order = 2
name = "pools"
tags = ["pools"]
dependencies = ["uniswap", "tokens"]

[[steps.contracts]]
symbol = "uniV3Pooler"
name = "UniV3Pooler"
args = ["@uniswapV3NftManager", "@baseToken"]
"#;

/// Placeholder of `NFTDescriptor` inside the descriptor's bytecode.
const PLACEHOLDER: &str = "__$cea9be979eee3d87fb124d6cbb244bb0b5$__";

/// Test workspace: temp directory, configuration and chain.
struct TestContext {
    temp_dir: TempDir,
    config: Config,
    chain: MockChain,
}

impl TestContext {
    fn new() -> Result<Self> {
        Self::with_chain(MockChain::new())
    }

    fn with_chain(chain: MockChain) -> Result<Self> {
        Self::with_manifest(chain, MANIFEST)
    }

    fn with_manifest(chain: MockChain, manifest: &str) -> Result<Self> {
        let temp_dir = TempDir::new("stakeroute-test").context("Failed to create temp dir")?;
        let mut config = Config::template()?;
        config.rebase(temp_dir.path());
        config.networks.insert(
            "goerli".to_string(),
            NetworkConfig {
                chain_id: Some(5),
                ..NetworkConfig::new("https://goerli.example.org".parse()?)
            },
        );

        let context = Self {
            temp_dir,
            config,
            chain,
        };
        context.write_artifacts()?;
        std::fs::write(&context.config.paths.manifest, manifest)
            .context("Failed to write manifest")?;

        Ok(context)
    }

    fn write_artifacts(&self) -> Result<()> {
        let artifacts = &self.config.paths.artifacts;
        let plain = [
            ("WETH", "contracts/test/WETH.sol"),
            ("UniswapV3Factory", "@uniswap/v3-core/UniswapV3Factory.sol"),
            ("NFTDescriptor", "@uniswap/v3-periphery/libraries/NFTDescriptor.sol"),
            ("NonfungiblePositionManager", "@uniswap/v3-periphery/NonfungiblePositionManager.sol"),
            ("TestERC20", "contracts/test/TestERC20.sol"),
            ("UniV3Pooler", "contracts/src/routes/UniV3Pooler.sol"),
        ];

        for (name, dir) in plain {
            // Distinct creation code per contract.
            let bytecode = format!("0x6080{}", hex::encode(name));
            write_artifact(
                &artifacts.join(dir),
                name,
                serde_json::json!({ "contractName": name, "bytecode": bytecode }),
            )?;
        }

        write_artifact(
            &artifacts.join("@uniswap/v3-periphery/NonfungibleTokenPositionDescriptor.sol"),
            "NonfungibleTokenPositionDescriptor",
            serde_json::json!({
                "contractName": "NonfungibleTokenPositionDescriptor",
                "bytecode": format!("0x6080{PLACEHOLDER}6000"),
                "linkReferences": {
                    "@uniswap/v3-periphery/libraries/NFTDescriptor.sol": {
                        "NFTDescriptor": [{ "start": 2, "length": 20 }]
                    }
                }
            }),
        )
    }

    fn network(&self, network: &str) -> &NetworkConfig {
        &self.config.networks[network]
    }

    async fn sequence(&self, network: &str) -> Result<Sequence<'_, MockChain>> {
        self.sequence_with(network, self.network(network).clone())
            .await
    }

    async fn sequence_with(
        &self,
        network: &str,
        config: NetworkConfig,
    ) -> Result<Sequence<'_, MockChain>> {
        Sequence::new(
            &self.chain,
            self.config.artifacts(),
            self.config.state(network),
            config.options(),
        )
        .await
    }

    async fn run(&self, network: &str, tags: &[&str]) -> Result<DeployReport> {
        self.run_manifest(network, &self.config.manifest()?, tags).await
    }

    async fn run_manifest(
        &self,
        network: &str,
        manifest: &Manifest,
        tags: &[&str],
    ) -> Result<DeployReport> {
        let tags: Vec<String> = tags.iter().map(|tag| tag.to_string()).collect();
        self.sequence(network).await?.run(manifest, &tags).await
    }

    fn records(&self, network: &str) -> DeploymentRecords {
        DeploymentRecords::new(&self.config.paths.deployments, network)
    }

    fn write_seed(&self, network: &str, entries: &[(&str, Address)]) -> Result<()> {
        let store = AddressStore::from_entries(network, entries.iter().copied());
        store.save_to_file(&AddressStore::seed_path(&self.config.paths.addresses, network))
    }
}

fn write_artifact(dir: &Path, name: &str, content: serde_json::Value) -> Result<()> {
    std::fs::create_dir_all(dir).context("Failed to create artifact dir")?;
    std::fs::write(
        dir.join(format!("{name}.json")),
        serde_json::to_string_pretty(&content)?,
    )
    .context("Failed to write artifact")
}

fn addresses(report: &DeployReport) -> Vec<(String, Address)> {
    report
        .iter()
        .map(|entry| (entry.symbol.clone(), entry.address))
        .collect()
}

#[tokio::test]
async fn test_second_run_is_a_no_op() -> Result<()> {
    let ctx = TestContext::new()?;

    let first = ctx.run("localhost", &[]).await?;
    assert_eq!(first.len(), 7);
    assert_eq!(first.deployed().count(), 7);
    let transactions = ctx.chain.transaction_count();
    assert_eq!(transactions, 7);

    let second = ctx.run("localhost", &[]).await?;
    assert_eq!(addresses(&first), addresses(&second));
    assert_eq!(second.deployed().count(), 0);
    assert_eq!(ctx.chain.transaction_count(), transactions);
    for entry in second.iter() {
        assert_eq!(
            entry.outcome,
            Outcome::Reused {
                source: Source::DeploymentRecord
            }
        );
    }

    Ok(())
}

#[tokio::test]
async fn test_deployment_record_then_resolve() -> Result<()> {
    let ctx = TestContext::new()?;
    let factory = ContractSpec::new("uniswapV3Factory", "UniswapV3Factory");

    let mut sequence = ctx.sequence("localhost").await?;
    let (address, outcome) = sequence.ensure(&factory).await?;
    assert!(outcome.is_deployed());

    let record_path = ctx
        .temp_dir
        .path()
        .join("deployments/localhost/UniswapV3Factory.json");
    assert!(record_path.exists());
    assert_eq!(ctx.records("localhost").load("UniswapV3Factory"), Some(address));
    assert_eq!(ctx.records("localhost").chain_id(), Some(31337));

    let state = ctx.config.state("localhost");
    let resolved = state
        .resolver()
        .resolve(&factory)
        .await
        .context("Factory should resolve")?;
    assert_eq!(resolved.address, address);
    assert_eq!(resolved.source, Source::DeploymentRecord);

    Ok(())
}

#[tokio::test]
async fn test_seed_resolves_without_deploying() -> Result<()> {
    let ctx = TestContext::with_chain(MockChain::new().with_chain_id(5))?;
    ctx.write_seed("goerli", &[("wrappedNative", GOERLI_WETH)])?;
    ctx.records("goerli").write("WETH", RECORDED_WETH)?;
    ctx.chain.set_code(GOERLI_WETH, "0x6080".parse()?);

    let weth = ContractSpec::new("wrappedNative", "WETH");

    let state = ctx.config.state("goerli");
    let resolved = state
        .resolver()
        .resolve(&weth)
        .await
        .context("WETH should resolve")?;
    assert_eq!(resolved.address, GOERLI_WETH);
    assert_eq!(resolved.source, Source::AddressBook);

    let mut sequence = ctx.sequence("goerli").await?;
    let (address, outcome) = sequence.ensure(&weth).await?;
    assert_eq!(address, GOERLI_WETH);
    assert_eq!(
        outcome,
        Outcome::Reused {
            source: Source::AddressBook
        }
    );
    assert_eq!(ctx.chain.transaction_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_resume_after_partial_failure() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.chain.fail_after(2);

    let err = ctx
        .run("localhost", &[])
        .await
        .expect_err("Third deployment should fail");
    assert!(format!("{err:#}").contains("uniswap-v3"));

    let records = ctx.records("localhost");
    let weth = records.load("WETH").context("WETH should be recorded")?;
    assert!(records.load("UniswapV3Factory").is_some());
    assert_eq!(records.load("NFTDescriptor"), None);

    ctx.chain.heal();
    let report = ctx.run("localhost", &[]).await?;

    assert_eq!(report.reused().count(), 2);
    assert_eq!(report.deployed().count(), 5);
    assert_eq!(report.address("wrappedNative"), Some(weth));
    assert_eq!(ctx.chain.transaction_count(), 7);

    Ok(())
}

#[tokio::test]
async fn test_corrupt_record_is_redeployed() -> Result<()> {
    let ctx = TestContext::new()?;
    let records = ctx.records("localhost");
    std::fs::create_dir_all(records.network_dir())?;
    std::fs::write(records.path_for("WETH"), "{ \"address\": 42 }")?;

    let report = ctx.run("localhost", &["uniswap"]).await?;

    let weth = report.address("wrappedNative").context("WETH should be ensured")?;
    assert!(report[0].outcome.is_deployed());
    assert_eq!(records.load("WETH"), Some(weth));

    Ok(())
}

#[tokio::test]
async fn test_tag_selection_pulls_dependencies() -> Result<()> {
    let ctx = TestContext::new()?;

    let uniswap = ctx.run("localhost", &["uniswap"]).await?;
    assert_eq!(uniswap.len(), 5);
    assert!(uniswap.address("baseToken").is_none());

    let pools = ctx.run("localhost", &["pools"]).await?;
    assert_eq!(pools.len(), 7);
    assert_eq!(pools.deployed().count(), 2);

    let err = ctx
        .run("localhost", &["staking"])
        .await
        .expect_err("Unknown tag should fail");
    assert!(err.to_string().contains("staking"));

    Ok(())
}

#[tokio::test]
async fn test_linked_contract_uses_create() -> Result<()> {
    let ctx = TestContext::new()?;

    let report = ctx.run("localhost", &["uniswap"]).await?;

    let library = report.address("nftDescriptor").context("Library should deploy")?;
    let descriptor = report
        .address("uniswapV3NftDescriptor")
        .context("Descriptor should deploy")?;

    // Third transaction of the run, nonce 3.
    assert_eq!(descriptor, DEV_ACCOUNT.create(3));

    let code = ctx.chain.code_at(descriptor).await?;
    assert_eq!(&code[2..22], library.as_slice());

    Ok(())
}

#[tokio::test]
async fn test_stale_records_are_redeployed_after_chain_reset() -> Result<()> {
    let ctx = TestContext::new()?;

    let first = ctx.run("localhost", &["uniswap"]).await?;
    ctx.chain.reset();

    let second = ctx.run("localhost", &["uniswap"]).await?;
    assert_eq!(second.deployed().count(), 5);
    assert_eq!(ctx.chain.transaction_count(), 10);
    assert_eq!(first.address("wrappedNative"), second.address("wrappedNative"));
    assert_eq!(
        first.address("uniswapV3NftManager"),
        second.address("uniswapV3NftManager")
    );

    Ok(())
}

#[tokio::test]
async fn test_stale_records_are_trusted_without_verification() -> Result<()> {
    let ctx = TestContext::new()?;

    ctx.run("localhost", &["uniswap"]).await?;
    ctx.chain.reset();

    let network = NetworkConfig {
        verify_code: false,
        ..ctx.network("localhost").clone()
    };
    let manifest = ctx.config.manifest()?;
    let report = ctx
        .sequence_with("localhost", network)
        .await?
        .run(&manifest, &["uniswap".to_string()])
        .await?;

    assert_eq!(report.deployed().count(), 0);
    assert_eq!(ctx.chain.transaction_count(), 5);

    Ok(())
}

#[tokio::test]
async fn test_force_redeploy_ignores_persisted_addresses() -> Result<()> {
    let ctx = TestContext::new()?;

    let first = ctx.run("localhost", &["uniswap"]).await?;

    let network = NetworkConfig {
        force_redeploy: true,
        ..ctx.network("localhost").clone()
    };
    let manifest = ctx.config.manifest()?;
    let second = ctx
        .sequence_with("localhost", network)
        .await?
        .run(&manifest, &["uniswap".to_string()])
        .await?;
    assert_eq!(second.deployed().count(), 5);

    // Deterministic contracts with unchanged init code converge without a transaction.
    // The linked descriptor gets a fresh CREATE address, which changes the manager's args.
    assert_eq!(ctx.chain.transaction_count(), 7);
    assert_eq!(first.address("uniswapV3Factory"), second.address("uniswapV3Factory"));
    assert_ne!(
        first.address("uniswapV3NftDescriptor"),
        second.address("uniswapV3NftDescriptor")
    );
    assert_ne!(
        first.address("uniswapV3NftManager"),
        second.address("uniswapV3NftManager")
    );
    assert_eq!(
        ctx.records("localhost").load("NonfungiblePositionManager"),
        second.address("uniswapV3NftManager")
    );

    Ok(())
}

#[tokio::test]
async fn test_external_contract_resolves_from_package() -> Result<()> {
    let ctx = TestContext::new()?;
    let package_root = ctx.temp_dir.path().join("node_modules/@cartesi/token/deployments");
    let ctsi = address!("00000000000000000000000000000000000000c7");
    DeploymentRecords::new(&package_root, "localhost").write("CartesiToken", ctsi)?;
    ctx.chain.set_code(ctsi, "0x6080".parse()?);

    let mut config = ctx.config.clone();
    config.packages.insert("cartesi-token".to_string(), package_root);

    let manifest = Manifest::from_toml_str(
        r#"
        [[steps]]
        order = 0
        name = "cartesi"

        [[steps.contracts]]
        symbol = "ctsi"
        name = "CTSI"
        external = true
        package = { name = "cartesi-token", contract = "CartesiToken" }
        "#,
    )?;

    let mut sequence = Sequence::new(
        &ctx.chain,
        config.artifacts(),
        config.state("localhost"),
        ctx.network("localhost").options(),
    )
    .await?;
    let report = sequence.run(&manifest, &[]).await?;

    assert_eq!(report.address("ctsi"), Some(ctsi));
    assert_eq!(
        report[0].outcome,
        Outcome::Reused {
            source: Source::Package("cartesi-token".to_string())
        }
    );

    let err = Sequence::new(
        &ctx.chain,
        ctx.config.artifacts(),
        ctx.config.state("localhost"),
        ctx.network("localhost").options(),
    )
    .await?
    .run(&manifest, &[])
    .await
    .expect_err("Unresolvable external contract should fail");
    assert!(format!("{err:#}").contains("External contract CTSI"));

    Ok(())
}

#[tokio::test]
async fn test_chain_id_mismatch_fails() -> Result<()> {
    let ctx = TestContext::new()?;

    let err = ctx
        .sequence("goerli")
        .await
        .err()
        .context("Goerli config against a local chain should fail")?;
    assert!(err.to_string().contains("expects chain id 5"));

    Ok(())
}

#[test]
fn test_workspace_files_are_valid() -> Result<()> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");

    let config = Config::load_from_file(&root)?;
    assert!(config.network("polygon_mainnet").is_ok());
    assert!(config.packages.contains_key("cartesi-token"));

    let manifest = Manifest::load_from_file(&root.join("deploy.toml"))?;
    let steps = manifest.select(&["UniswapRoutes".to_string()])?;
    assert_eq!(steps.len(), 6);

    let uniswap = manifest.select(&["UniswapV3".to_string()])?;
    assert_eq!(uniswap.len(), 1);

    let funding = manifest.select(&["FundDeployer".to_string()])?;
    assert_eq!(funding.len(), 3);

    let seed = AddressStore::load("polygon_mainnet", &root.join("addresses"));
    assert!(seed.get("curveAavePool").is_some());

    Ok(())
}

const FUNDED_MANIFEST: &str = r#"
[[steps]]
order = 0
name = "tokens"
tags = ["tokens"]

[[steps.contracts]]
symbol = "usdcToken"
name = "USDC"
artifact = "TestERC20"
args = ["string:USD Coin", "string:USDC", "deployer"]

[[steps.contracts]]
symbol = "usdcPool"
name = "USDCPool"
artifact = "UniswapV3Factory"

[[steps.calls]]
name = "usdc-pool-init"
contract = "usdcPool"
function = "initialize(address)"
args = ["@usdcToken"]
guard = { function = "lastInitializedRevision()", returns = "(uint256)" }

[[steps.calls]]
name = "usdc-funds"
contract = "usdcToken"
function = "mint(address,uint256)"
args = ["deployer", "uint:1000"]
guard = { function = "balanceOf(address)", args = ["deployer"], returns = "(uint256)" }
skip_if = { at_least = "uint:1000" }
"#;

#[tokio::test]
async fn test_calls_are_sent_once_across_runs() -> Result<()> {
    let chain = MockChain::new();
    chain.mirror("mint(address,uint256)", "balanceOf(address)");
    chain.flag("initialize(address)", "lastInitializedRevision()", 0);
    let ctx = TestContext::with_manifest(chain, FUNDED_MANIFEST)?;

    let first = ctx.run("localhost", &[]).await?;
    assert_eq!(first.executed().count(), 2);
    assert_eq!(first.skipped().count(), 0);
    assert!(matches!(first.calls()[0].outcome, CallOutcome::Executed { .. }));

    let usdc = first.address("usdcToken").context("USDC should deploy")?;
    let pool = first.address("usdcPool").context("Pool should deploy")?;
    let transactions = ctx.chain.transaction_count();

    let second = ctx.run("localhost", &[]).await?;
    assert_eq!(second.executed().count(), 0);
    assert_eq!(second.skipped().count(), 2);
    assert_eq!(ctx.chain.transaction_count(), transactions);
    assert_eq!(ctx.chain.calls_to(usdc), 1);
    assert_eq!(ctx.chain.calls_to(pool), 1);

    Ok(())
}

#[tokio::test]
async fn test_unsatisfied_guard_resends_the_call() -> Result<()> {
    // No effect registered: the balance never shows up.
    let ctx = TestContext::with_manifest(MockChain::new(), FUNDED_MANIFEST)?;

    let first = ctx.run("localhost", &[]).await?;
    let usdc = first.address("usdcToken").context("USDC should deploy")?;
    ctx.run("localhost", &[]).await?;

    assert_eq!(ctx.chain.calls_to(usdc), 2);

    Ok(())
}

#[tokio::test]
async fn test_stale_seed_falls_back_to_record() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.write_seed("localhost", &[("wrappedNative", GOERLI_WETH)])?;
    ctx.records("localhost").write("WETH", RECORDED_WETH)?;
    ctx.chain.set_code(RECORDED_WETH, "0x6080".parse()?);

    let mut sequence = ctx.sequence("localhost").await?;
    let (address, outcome) = sequence
        .ensure(&ContractSpec::new("wrappedNative", "WETH"))
        .await?;

    assert_eq!(address, RECORDED_WETH);
    assert_eq!(
        outcome,
        Outcome::Reused {
            source: Source::DeploymentRecord
        }
    );
    assert_eq!(ctx.chain.transaction_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_stale_seed_is_deployed_over_once() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.write_seed("localhost", &[("wrappedNative", GOERLI_WETH)])?;
    let manifest = Manifest::from_toml_str(
        r#"
        [[steps]]
        order = 0
        name = "weth"

        [[steps.contracts]]
        symbol = "wrappedNative"
        name = "WETH"
        deterministic = false
        "#,
    )?;

    let first = ctx.run_manifest("localhost", &manifest, &[]).await?;
    assert_eq!(first.deployed().count(), 1);
    let weth = first.address("wrappedNative").context("WETH should deploy")?;
    assert_ne!(weth, GOERLI_WETH);

    for _ in 0..2 {
        let report = ctx.run_manifest("localhost", &manifest, &[]).await?;
        assert_eq!(report.address("wrappedNative"), Some(weth));
        assert_eq!(
            report[0].outcome,
            Outcome::Reused {
                source: Source::DeploymentRecord
            }
        );
    }
    assert_eq!(ctx.chain.transaction_count(), 1);

    Ok(())
}

const SPLIT_MANIFEST: &str = r#"
[[steps]]
order = 0
name = "factory"
tags = ["A"]

[[steps.contracts]]
symbol = "a"
name = "UniswapV3Factory"

[[steps]]
order = 1
name = "pooler"
tags = ["B"]

[[steps.contracts]]
symbol = "uniV3Pooler"
name = "UniV3Pooler"
args = ["@a"]
"#;

#[tokio::test]
async fn test_reference_resolves_from_earlier_run() -> Result<()> {
    let ctx = TestContext::with_manifest(MockChain::new(), SPLIT_MANIFEST)?;

    let factory = ctx.run("localhost", &["A"]).await?;
    let a = factory.address("a").context("Factory should deploy")?;

    let pooler = ctx.run("localhost", &["B"]).await?;
    assert_eq!(pooler.len(), 1);
    let address = pooler.address("uniV3Pooler").context("Pooler should deploy")?;

    let code = ctx.chain.code_at(address).await?;
    assert_eq!(&code[code.len() - 20..], a.as_slice());

    Ok(())
}

#[tokio::test]
async fn test_reference_to_undeployed_contract_fails() -> Result<()> {
    let ctx = TestContext::with_manifest(MockChain::new(), SPLIT_MANIFEST)?;

    let err = ctx
        .run("localhost", &["B"])
        .await
        .expect_err("Pooler needs the factory");
    assert!(format!("{err:#}").contains("run the step that deploys it first"));

    ctx.run("localhost", &["A"]).await?;
    ctx.chain.reset();

    let err = ctx
        .run("localhost", &["B"])
        .await
        .expect_err("Recorded factory is gone after the reset");
    assert!(format!("{err:#}").contains("run the step that deploys it first"));
    assert_eq!(ctx.records("localhost").load("UniV3Pooler"), None);

    Ok(())
}

/// Artifacts for every contract of `manifest` the sequence may deploy, libraries linked
/// through one placeholder each.
fn write_manifest_artifacts(root: &Path, manifest: &Manifest) -> Result<()> {
    let mut written = BTreeSet::new();

    for contract in manifest.contracts() {
        if contract.query.is_some() || contract.external {
            continue;
        }
        let name = contract.artifact_name();
        if !written.insert(name.to_string()) {
            continue;
        }

        let mut bytecode = format!("0x6080{}", hex::encode(name));
        let mut links = serde_json::Map::new();
        for (index, library) in contract.libraries.keys().enumerate() {
            bytecode.push_str(&format!("__${index:034x}$__"));
            links.insert(
                library.clone(),
                serde_json::json!([{ "start": 2 + name.len() + 20 * index, "length": 20 }]),
            );
        }

        write_artifact(
            &root.join(format!("{name}.sol")),
            name,
            serde_json::json!({
                "contractName": name,
                "bytecode": bytecode,
                "linkReferences": { format!("contracts/{name}.sol"): links },
            }),
        )?;
    }

    Ok(())
}

fn address_word(address: Address) -> Bytes {
    Bytes::from(DynSolValue::Address(address).abi_encode())
}

fn address_list(addresses: &[Address]) -> Bytes {
    let items = addresses.iter().copied().map(DynSolValue::Address).collect();
    Bytes::from(DynSolValue::Tuple(vec![DynSolValue::Array(items)]).abi_encode_params())
}

/// The shipped manifest against a chain that remembers what its calls did.
fn shipped_manifest_context() -> Result<(TestContext, Manifest)> {
    let chain = MockChain::new();
    for (setter, getter) in [
        ("setAddress(bytes32,address)", "getAddress(bytes32)"),
        ("setMarketBorrowRate(address,uint256)", "getMarketBorrowRate(address)"),
        ("initialize(address)", "getAddressesProvider()"),
        ("set_minter(address)", "minter()"),
        ("mint(address,uint256)", "balanceOf(address)"),
        ("transfer(address,uint256)", "balanceOf(address)"),
    ] {
        chain.mirror(setter, getter);
    }
    chain.flag("initialize(address)", "lastInitializedRevision()", 0);
    chain.flag("addMinter(address)", "isMinter(address)", 1);
    chain.flag("grantRole(bytes32,address)", "hasRole(bytes32,address)", 2);
    chain.flag("add_type(string,uint256)", "n_gauge_types()", 0);
    chain.flag("add_gauge(address,int128,uint256)", "n_gauges()", 0);

    // Contracts created by the lending pool and the pool factory.
    let reserve_proxy = address!("00000000000000000000000000000000000000a7");
    let pool = address!("00000000000000000000000000000000000000b3");
    chain.set_code(reserve_proxy, Bytes::from_static(&[0x60, 0x80]));
    chain.set_code(pool, Bytes::from_static(&[0x60, 0x80]));

    let mut reserve_data = vec![0u8; 12 * 32];
    reserve_data[7 * 32..8 * 32].copy_from_slice(&address_word(reserve_proxy));
    chain.stub_function("getReserveData(address)", Bytes::from(reserve_data));
    chain.stub_function("uniswapV3Pool()", address_word(pool));
    chain.stub_function("getReservesList()", address_list(&[]));

    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let text = std::fs::read_to_string(root.join("deploy.toml"))?;
    let manifest = Manifest::from_toml_str(&text)?;

    let ctx = TestContext::with_manifest(chain, &text)?;
    std::fs::remove_dir_all(&ctx.config.paths.artifacts)?;
    write_manifest_artifacts(&ctx.config.paths.artifacts, &manifest)?;

    Ok((ctx, manifest))
}

#[tokio::test]
async fn test_shipped_manifest_runs_on_localhost() -> Result<()> {
    let (ctx, manifest) = shipped_manifest_context()?;

    let first = ctx.run_manifest("localhost", &manifest, &[]).await?;
    assert!(!first.calls().is_empty());
    assert_eq!(first.executed().count(), first.calls().len());
    assert_eq!(first.skipped().count(), 0);
    assert_eq!(first.queried().count(), 4);
    assert_eq!(first.deployed().count() + 4, first.len());

    // The configurator has registered the reserves by now.
    let reserves: Vec<Address> = ["daiToken", "usdcToken", "usdtToken"]
        .into_iter()
        .map(|symbol| first.address(symbol).context("Stablecoin should deploy"))
        .collect::<Result<_>>()?;
    ctx.chain
        .stub_function("getReservesList()", address_list(&reserves));

    let creations = ctx.chain.creation_count();
    let transactions = ctx.chain.transaction_count();

    let second = ctx.run_manifest("localhost", &manifest, &[]).await?;
    assert_eq!(second.deployed().count(), 0);
    assert_eq!(second.executed().count(), 0);
    assert_eq!(second.skipped().count(), first.calls().len());
    assert_eq!(addresses(&first), addresses(&second));
    assert_eq!(ctx.chain.creation_count(), creations);
    assert_eq!(ctx.chain.transaction_count(), transactions);

    Ok(())
}

#[tokio::test]
async fn test_shipped_manifest_runs_on_hardhat() -> Result<()> {
    let (ctx, manifest) = shipped_manifest_context()?;

    let report = ctx.run_manifest("hardhat", &manifest, &[]).await?;
    assert_eq!(report.executed().count(), report.calls().len());
    assert_eq!(report.queried().count(), 4);

    let pool = report.address("aavePool").context("Lending pool should deploy")?;
    assert!(ctx.chain.has_code(pool));

    Ok(())
}
