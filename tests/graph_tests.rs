//! Build graph construction over loaded workloads.

mod helpers;

use helpers::TestEnv;
use marshal::executor::plan;
use marshal::graph::{build_graph, node_id, workload_nodes, FileDep, NodeKind};
use marshal::workload::load_workloads;
use serde_json::json;
use std::collections::BTreeSet;

#[test]
fn test_bare_workload_has_only_a_binary() {
    let env = TestEnv::new();
    let cfg = env.write_workload("hello.json", json!({"name": "hello", "base": "bare"}));

    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let hello = set.get(&cfg, &env.config.workload_dir).unwrap();
    let nodes = workload_nodes(hello);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].kind, NodeKind::Binary);
    assert_eq!(nodes[0].id, node_id(&env.bin("hello")));
    assert!(nodes[0].file_deps.is_empty());

    let graph = build_graph(&set);
    assert_eq!(graph.count(NodeKind::Binary), 1);
    assert_eq!(graph.count(NodeKind::Image), 0);
    // br and fedora base images; bare has none.
    assert_eq!(graph.count(NodeKind::BaseImage), 2);
}

#[test]
fn test_image_file_deps_cover_overlay_base_and_config() {
    let env = TestEnv::new();
    let a = env.workload_file("cfg", "dirA/one.conf", "1");
    let b = env.workload_file("cfg", "dirA/nested/two.conf", "2");
    let cfg = env.write_workload(
        "cfg.json",
        json!({"name": "cfg", "base": "br", "files": [["dirA", "/etc/cfg"]]}),
    );

    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let workload = set.get(&cfg, &env.config.workload_dir).unwrap();
    let graph = build_graph(&set);
    let image = graph.get(&node_id(&env.image("cfg"))).unwrap();

    let base = env.config.images_dir.join("br-base.img");
    let shared = marshal::workload::WorkloadConfig {
        jobs: Default::default(),
        ..workload.clone()
    };
    let expected: BTreeSet<FileDep> = [
        FileDep::Path(a),
        FileDep::Path(b),
        FileDep::Path(base.clone()),
        FileDep::Config(shared.digest()),
    ]
    .into_iter()
    .collect();
    assert_eq!(image.file_deps, expected);
    assert_eq!(
        image.task_deps,
        [node_id(&base)].into_iter().collect::<BTreeSet<_>>()
    );
}

#[test]
fn test_init_and_initramfs_edges() {
    let env = TestEnv::new();
    let init = env.workload_file("boot", "init.sh", "#!/bin/sh\n");
    env.write_workload(
        "boot.json",
        json!({"name": "boot", "base": "br", "init": "init.sh", "initramfs": true}),
    );

    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let graph = build_graph(&set);

    let img_id = node_id(&env.image("boot"));
    let bin_id = node_id(&env.bin("boot"));
    let initramfs = graph.get(&format!("{}-initramfs", bin_id)).unwrap();
    assert_eq!(initramfs.kind, NodeKind::InitramfsBinary);
    assert!(initramfs.task_deps.contains(&img_id));
    assert!(initramfs.file_deps.contains(&FileDep::Path(env.image("boot"))));

    let image = graph.get(&img_id).unwrap();
    assert!(image.task_deps.contains(&bin_id));
    assert!(image.file_deps.contains(&FileDep::Path(init)));

    // Every node can be ordered, so the graph is acyclic.
    let all: Vec<String> = graph.nodes().map(|n| n.id.clone()).collect();
    let order = plan(&graph, &all).unwrap();
    assert_eq!(order.len(), graph.len());
    let pos = |id: &str| order.iter().position(|n| n.id == id).unwrap();
    assert!(pos(&bin_id) < pos(&img_id));
    assert!(pos(&img_id) < pos(&initramfs.id));
}

#[test]
fn test_image_without_init_does_not_wait_for_binary() {
    let env = TestEnv::new();
    env.write_workload("plain.json", json!({"name": "plain", "base": "br"}));

    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let graph = build_graph(&set);
    let image = graph.get(&node_id(&env.image("plain"))).unwrap();
    assert!(!image.task_deps.contains(&node_id(&env.bin("plain"))));
}

#[test]
fn test_job_names_never_collide_across_parents() {
    let env = TestEnv::new();
    env.write_workload(
        "net.json",
        json!({"name": "net", "base": "br", "jobs": [{"name": "client"}, {"name": "server"}]}),
    );
    env.write_workload(
        "disk.json",
        json!({"name": "disk", "base": "br", "jobs": [{"name": "client"}]}),
    );

    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let names: BTreeSet<&str> = set.workloads_and_jobs().map(|w| w.name.as_str()).collect();
    assert!(names.contains("net-client"));
    assert!(names.contains("net-server"));
    assert!(names.contains("disk-client"));

    let graph = build_graph(&set);
    let net_client = graph.get(&node_id(&env.image("net-client"))).unwrap();
    let disk_client = graph.get(&node_id(&env.image("disk-client"))).unwrap();
    assert_ne!(net_client.id, disk_client.id);

    // Jobs are seeded from their parent's image.
    assert!(net_client.task_deps.contains(&node_id(&env.image("net"))));
}

#[test]
fn test_job_change_does_not_touch_parent_config_identity() {
    let env = TestEnv::new();
    let cfg = env.write_workload(
        "net.json",
        json!({"name": "net", "base": "br", "jobs": [{"name": "client", "command": "a"}]}),
    );
    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let before = build_graph(&set)
        .get(&node_id(&env.image("net")))
        .unwrap()
        .file_deps
        .clone();

    env.write_workload(
        "net.json",
        json!({"name": "net", "base": "br", "jobs": [{"name": "client", "command": "b"}]}),
    );
    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();
    let after = build_graph(&set)
        .get(&node_id(&env.image("net")))
        .unwrap()
        .file_deps
        .clone();
    assert_eq!(before, after);

    let job = set.get(&cfg, &env.config.workload_dir).unwrap().job("client").unwrap();
    assert_eq!(job.name, "net-client");
}

#[test]
fn test_unbuildable_workload_contributes_nothing() {
    let env = TestEnv::new();
    let cfg = env.write_workload("plain.json", json!({"name": "plain", "base": "br"}));
    let set = load_workloads(&env.config, &env.config.workload_dir).unwrap();

    let mut workload = set.get(&cfg, &env.config.workload_dir).unwrap().clone();
    workload.linux_config = None;
    workload.img = None;
    assert!(workload_nodes(&workload).is_empty());
}
