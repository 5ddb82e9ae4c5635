//! S6: a realistic operator-authored command line survives a
//! `parse_command` -> `build_argv` round trip with every recognized flag
//! preserved and every unrecognized flag carried through via `extra_args`,
//! for each backend type — exercised here at the `BackendOptions` level the
//! façade and CLI actually call through, supplementing the per-backend unit
//! tests in `src/backend/*.rs`.

use llamactld::backend::{BackendOptions, BackendType};

#[test]
fn llama_cpp_round_trip_preserves_known_and_unknown_flags() {
    let command = "llama-server --model /models/m.gguf --host 0.0.0.0 --port 8081 \
        --ctx-size 8192 --gpu-layers 32 --lora a.bin --lora b.bin --verbose \
        --rope-freq-base 10000 --flash-attn";

    let parsed = BackendOptions::parse_command(BackendType::LlamaCpp, command).unwrap();
    assert_eq!(parsed.backend_type(), BackendType::LlamaCpp);
    assert_eq!(parsed.get_host(), "0.0.0.0");
    assert_eq!(parsed.get_port(), 8081);

    let argv = parsed.build_argv();
    assert!(argv.windows(2).any(|w| w == ["--model", "/models/m.gguf"]));
    assert!(argv.windows(2).any(|w| w == ["--ctx-size", "8192"]));
    assert!(argv.windows(2).any(|w| w == ["--gpu-layers", "32"]));
    assert_eq!(argv.iter().filter(|t| *t == "--lora").count(), 2);
    assert!(argv.contains(&"--verbose".to_string()));

    // Flags the typed record doesn't know about must round-trip unchanged.
    assert!(argv.windows(2).any(|w| w == ["--rope-freq-base", "10000"]));
    assert!(argv.contains(&"--flash-attn".to_string()));
}

#[test]
fn vllm_round_trip_preserves_known_and_unknown_flags() {
    let command = "vllm serve --model meta-llama/Llama-3-8B --tensor-parallel-size 2 \
        --enforce-eager --swap-space 4";

    let parsed = BackendOptions::parse_command(BackendType::Vllm, command).unwrap();
    let argv = parsed.build_argv();

    assert!(argv.windows(2).any(|w| w == ["--model", "meta-llama/Llama-3-8B"]));
    assert!(argv.windows(2).any(|w| w == ["--tensor-parallel-size", "2"]));
    assert!(argv.contains(&"--enforce-eager".to_string()));
    assert!(argv.windows(2).any(|w| w == ["--swap-space", "4"]));
}

#[test]
fn mlx_lm_round_trip_preserves_known_and_unknown_flags() {
    let command = "mlx_lm.server --model mlx-community/Mistral-7B --port 8082 --trust-remote-code";

    let parsed = BackendOptions::parse_command(BackendType::MlxLm, command).unwrap();
    assert_eq!(parsed.get_port(), 8082);

    let argv = parsed.build_argv();
    assert!(argv.windows(2).any(|w| w == ["--model", "mlx-community/Mistral-7B"]));
    assert!(argv.contains(&"--trust-remote-code".to_string()));

    // mlx_lm never supports docker execution, regardless of command content.
    assert!(parsed.build_docker_argv().is_empty());
}

#[test]
fn parse_command_without_leading_executable_is_accepted() {
    let parsed = BackendOptions::parse_command(BackendType::LlamaCpp, "--model /m.gguf --ctx-size 2048").unwrap();
    assert_eq!(parsed.build_argv().iter().filter(|t| *t == "--model").count(), 1);
}
