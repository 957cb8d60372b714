// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use kubedock_backend::{
	file_id, Backend, BackendConfig, BackendError, Container, DeployState, KubernetesBackend,
};
use kubedock_k8s::{
	ContainerState, ContainerStateRunning, ContainerStatus, MockK8sClient, Pod, PodStatus,
};

fn backend(mock: &MockK8sClient, config: BackendConfig) -> KubernetesBackend {
	KubernetesBackend::new(Arc::new(mock.clone()), config)
}

fn config() -> BackendConfig {
	BackendConfig {
		namespace: "ci".into(),
		instance_id: "test-run".into(),
		timeout_secs: 5,
		..Default::default()
	}
}

fn running() -> ContainerState {
	ContainerState {
		running: Some(ContainerStateRunning::default()),
		..Default::default()
	}
}

fn main_status(restarts: i32) -> PodStatus {
	PodStatus {
		phase: Some("Running".into()),
		pod_ip: Some("10.1.2.3".into()),
		container_statuses: Some(vec![ContainerStatus {
			name: "main".into(),
			state: Some(running()),
			restart_count: restarts,
			..Default::default()
		}]),
		..Default::default()
	}
}

fn init_running() -> PodStatus {
	PodStatus {
		phase: Some("Pending".into()),
		init_container_statuses: Some(vec![ContainerStatus {
			name: "setup".into(),
			state: Some(running()),
			..Default::default()
		}]),
		..Default::default()
	}
}

fn pending() -> PodStatus {
	PodStatus {
		phase: Some("Pending".into()),
		..Default::default()
	}
}

fn only_pod(mock: &MockK8sClient) -> Pod {
	let pods = mock.pods();
	assert_eq!(pods.len(), 1, "expected exactly one pod");
	pods.into_iter().next().unwrap()
}

fn unpack(archive: &[u8]) -> BTreeMap<String, Vec<u8>> {
	let mut files = BTreeMap::new();
	let mut archive = tar::Archive::new(archive);
	for entry in archive.entries().unwrap() {
		let mut entry = entry.unwrap();
		if !entry.header().entry_type().is_file() {
			continue;
		}
		let path = entry.path().unwrap().to_string_lossy().into_owned();
		let mut content = Vec::new();
		entry.read_to_end(&mut content).unwrap();
		files.insert(path, content);
	}
	files
}

fn site_fixture() -> tempfile::TempDir {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("index.html"), "<h1>kubedock</h1>").unwrap();
	std::fs::create_dir_all(dir.path().join("static/css")).unwrap();
	std::fs::write(dir.path().join("static/css/site.css"), "body{}").unwrap();
	dir
}

#[tokio::test]
async fn folder_volume_port_and_alias_end_to_end() {
	let mock = MockK8sClient::new();
	mock.push_status(init_running());
	mock.push_status(main_status(0));
	let backend = backend(&mock, config());

	let site = site_fixture();
	let mut container = Container::new("web", "nginx:1.27");
	container.volume_folders.insert("/usr/share/nginx/html".into(), site.path().to_path_buf());
	container.host_ports.insert(8080, 80);
	container.network_aliases = vec!["web".into()];

	let state = backend.start_container(&mut container).await.unwrap();
	assert_eq!(state, DeployState::Running);

	let pod = only_pod(&mock);
	assert_eq!(pod.metadata.name, Some(container.pod_name()));
	let spec = pod.spec.unwrap();

	let init = spec.init_containers.unwrap();
	assert_eq!(init.len(), 1);
	assert_eq!(init[0].name, "setup");
	assert_eq!(spec.containers.len(), 1);
	assert_eq!(spec.containers[0].name, "main");

	let volumes = spec.volumes.unwrap();
	assert_eq!(volumes.len(), 1);
	assert!(volumes[0].empty_dir.is_some());
	let volume_name = volumes[0].name.clone();
	for c in init.iter().chain(spec.containers.iter()) {
		let mounts = c.volume_mounts.clone().unwrap();
		assert!(mounts
			.iter()
			.any(|m| m.name == volume_name && m.mount_path == "/usr/share/nginx/html"));
	}

	let ports: HashSet<i32> = spec.containers[0]
		.ports
		.clone()
		.unwrap()
		.iter()
		.map(|p| p.container_port)
		.collect();
	assert_eq!(ports, HashSet::from([80]));

	let services = mock.services();
	assert_eq!(services.len(), 1);
	assert_eq!(services[0].metadata.name.as_deref(), Some("web"));
	let service_ports: HashSet<String> = services[0]
		.spec
		.clone()
		.unwrap()
		.ports
		.unwrap()
		.into_iter()
		.filter_map(|p| p.name)
		.collect();
	assert_eq!(service_ports, HashSet::from(["tcp-8080-80".to_string()]));

	let calls = mock.exec_calls();
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0].container, "setup");
	assert_eq!(calls[0].command, vec!["tar", "-xf", "-", "-C", "/usr/share/nginx/html"]);
	assert_eq!(calls[1].command, vec!["touch", "/tmp/done"]);

	let files = unpack(&calls[0].stdin);
	let names: HashSet<&str> = files.keys().map(String::as_str).collect();
	assert_eq!(names, HashSet::from(["index.html", "static/css/site.css"]));
	assert_eq!(files["index.html"], b"<h1>kubedock</h1>");
}

#[tokio::test]
async fn plain_container_has_no_staging_or_services() {
	let mock = MockK8sClient::new();
	mock.push_status(main_status(0));
	let backend = backend(&mock, config());

	let mut container = Container::new("worker", "busybox");
	container.cmd = vec!["sleep".into(), "3600".into()];

	let state = backend.start_container(&mut container).await.unwrap();
	assert_eq!(state, DeployState::Running);

	let spec = only_pod(&mock).spec.unwrap();
	assert!(spec.init_containers.is_none());
	assert!(spec.volumes.is_none());
	assert!(mock.config_maps().is_empty());
	assert!(mock.services().is_empty());
	assert!(mock.exec_calls().is_empty());
}

#[tokio::test]
async fn restarted_container_fails_and_is_removed() {
	let mock = MockK8sClient::new();
	mock.push_status(main_status(1));
	mock.set_logs(b"panic: boom\n");
	let backend = backend(
		&mock,
		BackendConfig {
			dump_logs_on_failure: true,
			..config()
		},
	);

	let mut container = Container::new("crashy", "busybox");
	let result = backend.start_container(&mut container).await;

	assert!(matches!(result, Err(BackendError::ContainerFailed { .. })));
	assert_eq!(DeployState::from_result(&result), DeployState::Failed);
	assert!(mock.pods().is_empty());
	assert_eq!(mock.deleted_pods(), vec![container.pod_name()]);
}

#[tokio::test(start_paused = true)]
async fn pending_pod_times_out_after_bound() {
	let mock = MockK8sClient::new();
	mock.push_status(pending());
	let backend = backend(&mock, config());

	let mut container = Container::new("slow", "busybox");
	let started = tokio::time::Instant::now();
	let result = backend.start_container(&mut container).await;

	assert!(result.as_ref().is_err_and(|e| e.is_timeout()));
	assert_eq!(started.elapsed(), Duration::from_secs(5));
	assert_eq!(mock.deleted_pods(), vec![container.pod_name()]);
}

#[tokio::test]
async fn service_failure_keeps_pod() {
	let mock = MockK8sClient::new();
	mock.push_status(main_status(0));
	mock.fail_service_creation();
	let backend = backend(&mock, config());

	let mut container = Container::new("db", "postgres:16");
	container.host_ports.insert(5432, 5432);
	container.network_aliases = vec!["db".into()];

	let result = backend.start_container(&mut container).await;
	assert!(matches!(result, Err(BackendError::ServiceProvisioning { .. })));
	assert_eq!(mock.pods().len(), 1);
	assert!(mock.deleted_pods().is_empty());
}

#[tokio::test]
async fn build_error_creates_nothing() {
	let mock = MockK8sClient::new();
	let backend = backend(&mock, config());

	let mut container = Container::new("web", "nginx");
	container.pull_policy = Some("sometimes".into());

	let result = backend.start_container(&mut container).await;
	assert!(matches!(result, Err(BackendError::InvalidPullPolicy(_))));
	assert!(mock.pods().is_empty());
	assert!(mock.deleted_pods().is_empty());
}

#[tokio::test]
async fn file_and_raw_volumes_use_config_maps() {
	let mock = MockK8sClient::new();
	mock.push_status(init_running());
	mock.push_status(main_status(0));
	let backend = backend(&mock, config());

	let dir = tempfile::tempdir().unwrap();
	let conf = dir.path().join("app.conf");
	std::fs::write(&conf, "listen 80;").unwrap();

	let mut container = Container::new("web", "nginx");
	container.add_bind("/etc/nginx/conf.d/app.conf", &conf).unwrap();
	container
		.pre_archives
		.insert("/etc/motd".into(), b"hello".to_vec());

	backend.start_container(&mut container).await.unwrap();

	let config_maps = mock.config_maps();
	let names: HashSet<String> = config_maps.iter().filter_map(|c| c.metadata.name.clone()).collect();
	assert_eq!(
		names,
		HashSet::from([
			format!("{}-vf", container.short_id),
			format!("{}-pf", container.short_id),
		])
	);

	let files = config_maps
		.iter()
		.find(|c| c.metadata.name == Some(format!("{}-vf", container.short_id)))
		.and_then(|c| c.binary_data.clone())
		.unwrap();
	let file_key = file_id(&conf.to_string_lossy());
	assert_eq!(files[&file_key].0, b"listen 80;");

	let raw = config_maps
		.iter()
		.find(|c| c.metadata.name == Some(format!("{}-pf", container.short_id)))
		.and_then(|c| c.binary_data.clone())
		.unwrap();
	assert_eq!(raw[&file_id("/etc/motd")].0, b"hello");

	let spec = only_pod(&mock).spec.unwrap();
	let mounts = spec.containers[0].volume_mounts.clone().unwrap();
	let conf_mount = mounts
		.iter()
		.find(|m| m.mount_path == "/etc/nginx/conf.d/app.conf")
		.unwrap();
	assert_eq!(conf_mount.name, "vfiles");
	assert_eq!(conf_mount.sub_path.as_deref(), Some(file_key.as_str()));
	let motd = mounts.iter().find(|m| m.mount_path == "/etc/motd").unwrap();
	assert_eq!(motd.name, "pfiles");

	// Only the release of the init container, no folders to copy.
	let calls = mock.exec_calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].command, vec!["touch", "/tmp/done"]);
}

#[tokio::test]
async fn failing_folder_copy_does_not_stop_staging() {
	let mock = MockK8sClient::new();
	mock.push_status(init_running());
	mock.push_status(main_status(0));
	mock.fail_exec_with_arg("/broken");
	let backend = backend(&mock, config());

	let ok = site_fixture();
	let broken = site_fixture();
	let mut container = Container::new("web", "nginx");
	container.volume_folders.insert("/srv".into(), ok.path().to_path_buf());
	container.volume_folders.insert("/broken".into(), broken.path().to_path_buf());

	let state = backend.start_container(&mut container).await.unwrap();
	assert_eq!(state, DeployState::Running);

	let commands: HashSet<Vec<String>> = mock.exec_calls().into_iter().map(|c| c.command).collect();
	let expected: HashSet<Vec<String>> = [
		vec!["tar", "-xf", "-", "-C", "/srv"],
		vec!["tar", "-xf", "-", "-C", "/broken"],
		vec!["touch", "/tmp/done"],
	]
	.into_iter()
	.map(|c| c.into_iter().map(String::from).collect())
	.collect();
	assert_eq!(commands, expected);
}

#[tokio::test(start_paused = true)]
async fn failed_pod_while_waiting_for_init_container() {
	let mock = MockK8sClient::new();
	mock.push_status(PodStatus {
		phase: Some("Failed".into()),
		..Default::default()
	});
	let backend = backend(&mock, config());

	let mut container = Container::new("web", "nginx");
	container.pre_archives.insert("/etc/motd".into(), b"hi".to_vec());

	let result = backend.start_container(&mut container).await;
	assert!(matches!(result, Err(BackendError::ContainerFailed { .. })));
	assert!(mock.pods().is_empty());
	assert!(mock.config_maps().is_empty());
}

#[tokio::test]
async fn publish_all_maps_exposed_ports_before_services() {
	let mock = MockK8sClient::new();
	mock.push_status(main_status(0));
	let backend = backend(&mock, config());

	let mut container = Container::new("cache", "redis:7");
	container.exposed_ports = vec![6379];
	container.publish_all = true;
	container.network_aliases = vec!["cache".into()];

	backend.start_container(&mut container).await.unwrap();

	let mapped: Vec<i32> = container.mapped_ports.values().copied().collect();
	assert_eq!(mapped, vec![6379]);
	let local = *container.mapped_ports.keys().next().unwrap();

	let services = mock.services();
	assert_eq!(services.len(), 1);
	let port_names: HashSet<String> = services[0]
		.spec
		.clone()
		.unwrap()
		.ports
		.unwrap()
		.into_iter()
		.filter_map(|p| p.name)
		.collect();
	assert_eq!(port_names, HashSet::from([format!("tcp-{local}-6379")]));
}

#[tokio::test]
async fn status_lookup_reflects_pod() {
	let mock = MockK8sClient::new();
	mock.push_status(main_status(0));
	let backend = backend(&mock, config());

	let mut container = Container::new("web", "nginx");
	backend.start_container(&mut container).await.unwrap();

	assert_eq!(backend.get_container_status(&container).await.unwrap(), DeployState::Running);
	assert_eq!(backend.get_pod_ip(&container).await.unwrap(), "10.1.2.3");

	let missing = Container::new("ghost", "nginx");
	let result = backend.get_container_status(&missing).await;
	assert_eq!(DeployState::from_result(&result), DeployState::Failed);
}

#[tokio::test]
async fn folder_named_like_config_map_volume_gets_its_own_volume() {
	let mock = MockK8sClient::new();
	mock.push_status(init_running());
	mock.push_status(main_status(0));
	let backend = backend(&mock, config());

	let site = site_fixture();
	let dir = tempfile::tempdir().unwrap();
	let conf = dir.path().join("a.conf");
	std::fs::write(&conf, "a=1").unwrap();

	let mut container = Container::new("web", "nginx");
	container.volume_folders.insert("/vfiles".into(), site.path().to_path_buf());
	container.add_bind("/etc/a.conf", &conf).unwrap();

	backend.start_container(&mut container).await.unwrap();

	let spec = only_pod(&mock).spec.unwrap();
	let names: Vec<String> = spec.volumes.unwrap().into_iter().map(|v| v.name).collect();
	let distinct: HashSet<&String> = names.iter().collect();
	assert_eq!(names.len(), 2);
	assert_eq!(distinct.len(), 2);

	let mounts = spec.containers[0].volume_mounts.clone().unwrap();
	let folder = mounts.iter().find(|m| m.mount_path == "/vfiles").unwrap();
	assert_ne!(folder.name, "vfiles");
	let file = mounts.iter().find(|m| m.mount_path == "/etc/a.conf").unwrap();
	assert_eq!(file.name, "vfiles");
}

#[tokio::test(start_paused = true)]
async fn init_container_wait_times_out_after_bound() {
	let mock = MockK8sClient::new();
	mock.push_status(pending());
	let backend = backend(
		&mock,
		BackendConfig {
			timeout_secs: 3,
			..config()
		},
	);

	let mut container = Container::new("web", "nginx");
	container.pre_archives.insert("/etc/motd".into(), b"hi".to_vec());

	let started = tokio::time::Instant::now();
	let result = backend.start_container(&mut container).await;

	assert!(result.as_ref().is_err_and(|e| e.is_timeout()));
	assert_eq!(started.elapsed(), Duration::from_secs(3));
	assert_eq!(mock.deleted_pods(), vec![container.pod_name()]);
	assert!(mock.pods().is_empty());
	assert!(mock.config_maps().is_empty());
}
