use std::path::Path;
use std::sync::Arc;

use crate::archive::tests::mock_client::MockClient;
use crate::config::PartialConfig;
use crate::stage_manager::StageContext;
use crate::stage_manager::tests::fixture::{context, runtime_archive, snapshot, write_script};

pub const RUNTIME_URL: &str = "https://example.invalid/therock-dist-linux-gfx1151-7.0.0.tar.gz";
pub const REVISION: &str = "4f2c1a9be07d35c8a1e6b0d92f7c4e18a3b5d6f0";

/// Stand-ins for git, cmake and ldd that behave like the real tools as far
/// as the stages can tell
pub fn fake_toolchain(tools: &Path, root: &Path) {
    write_script(&tools.join("git"), &format!("[ \"$3\" = rev-parse ] && echo {}\nexit 0", REVISION));
    write_script(&tools.join("ninja"), "exit 0");
    write_script(
        &tools.join("cmake"),
        "case \"$1\" in\n\
         --build)\n\
           mkdir -p \"$2/bin\"\n\
           for b in llama-cli llama-server llama-bench; do\n\
             printf '#!/bin/sh\\necho ok\\n' > \"$2/bin/$b\"; chmod +x \"$2/bin/$b\"\n\
           done ;;\n\
         --install)\n\
           mkdir -p \"$4/bin\" && cp \"$2\"/bin/* \"$4/bin/\" ;;\n\
         *)\n\
           mkdir -p \"$4\" && touch \"$4/CMakeCache.txt\" ;;\n\
         esac",
    );
    write_script(
        &tools.join("ldd"),
        &format!("echo '\tlibamdhip64.so.7 => {}/lib/libamdhip64.so.7 (0x00007f00)'", root.display()),
    );
}

/// A context whose runtime comes from the mock client and whose tools are
/// the fakes above, with `/usr/bin` and `/bin` behind them for `sh` and `tar`
pub fn pipeline_context(base: &Path, client: Arc<MockClient>) -> StageContext {
    client.serve(RUNTIME_URL, runtime_archive("echo 7.0.0-test"));
    let config = snapshot(
        base,
        PartialConfig { rocm_url: Some(RUNTIME_URL.to_string()), ..PartialConfig::default() },
    );
    let tools = base.join("tools");
    fake_toolchain(&tools, &config.install_root);
    context(config, client).with_search_path(Some(format!("{}:/usr/bin:/bin", tools.display())))
}
