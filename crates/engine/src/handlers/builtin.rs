//! Built-in collaborators. Each records one [`Detail`] per record under its
//! own name; list-valued fields are joined with `,`.

#![forbid(unsafe_code)]

use kmap_core::HandlerError;
use kmap_store::{Detail, DetailTable};
use serde_json::Value;
use smallvec::SmallVec;

use super::{HandlerCtx, KindHandler};
use crate::project::{self, render_scalar, PathSpec};

type Fields = SmallVec<[(String, String); 8]>;

pub const WORKLOAD_KINDS: &[&str] = &[
    "CronJob",
    "DaemonSet",
    "Deployment",
    "Job",
    "Pod",
    "ReplicaSet",
    "ReplicationController",
    "StatefulSet",
];

pub const PROJECTED_KINDS: &[&str] = &[
    "ControllerRevision",
    "CSIDriver",
    "CSINode",
    "CustomResourceDefinition",
    "Endpoints",
    "EndpointSlice",
    "Event",
    "HorizontalPodAutoscaler",
    "Node",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "StorageClass",
    "VolumeAttachment",
];

fn push(fields: &mut Fields, key: &str, value: impl Into<String>) {
    fields.push((key.to_string(), value.into()));
}

fn emit(out: &mut DetailTable, ctx: &HandlerCtx<'_>, handler: &'static str, fields: Fields) {
    out.push(ctx.record.id, Detail { handler, fields });
}

/// Array at `path`, `None` when absent, an error when present but not an array.
fn array_at<'a>(doc: &'a Value, pointer: &str, path: &'static str) -> Result<Option<&'a Vec<Value>>, HandlerError> {
    match doc.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(a)) => Ok(Some(a)),
        Some(_) => Err(HandlerError::UnexpectedType { path, expected: "array" }),
    }
}

fn names_of(items: &[Value], key: &str) -> String {
    items
        .iter()
        .filter_map(|i| i.get(key).and_then(render_scalar))
        .collect::<Vec<_>>()
        .join(",")
}

fn str_list<'a>(v: &'a Value, key: &str) -> Vec<&'a str> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str()).collect())
        .unwrap_or_default()
}

fn map_len(v: Option<&Value>) -> usize {
    v.and_then(|x| x.as_object()).map(|m| m.len()).unwrap_or(0)
}

/// Baseline for every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericHandler;

impl KindHandler for GenericHandler {
    fn name(&self) -> &'static str { "generic" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let mut f = Fields::new();
        push(&mut f, "apiVersion", ctx.record.api_version.as_str());
        if let Some(ts) = project::str_at(ctx.doc, "metadata.creationTimestamp") {
            push(&mut f, "created", ts);
        }
        push(&mut f, "labels", map_len(ctx.doc.pointer("/metadata/labels")).to_string());
        push(&mut f, "annotations", map_len(ctx.doc.pointer("/metadata/annotations")).to_string());
        if !ctx.owners.is_empty() {
            push(&mut f, "owners", ctx.owners.len().to_string());
        }
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

/// Containers, images and placement of anything that runs pods.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadHandler;

impl WorkloadHandler {
    fn pod_spec<'a>(kind: &str, doc: &'a Value) -> Option<&'a Value> {
        let spec = doc.get("spec").filter(|s| s.is_object())?;
        let nested = match kind {
            "Pod" => None,
            "CronJob" => spec.pointer("/jobTemplate/spec/template/spec"),
            _ => spec.pointer("/template/spec"),
        };
        Some(nested.filter(|s| s.is_object()).unwrap_or(spec))
    }
}

impl KindHandler for WorkloadHandler {
    fn name(&self) -> &'static str { "workload" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let spec = Self::pod_spec(&ctx.record.kind, ctx.doc).ok_or(HandlerError::MissingField("spec"))?;
        let containers = array_at(spec, "/containers", "containers")?.map(|v| v.as_slice()).unwrap_or(&[]);
        let init = array_at(spec, "/initContainers", "initContainers")?.map(|v| v.as_slice()).unwrap_or(&[]);

        let mut f = Fields::new();
        push(&mut f, "containers", names_of(containers, "name"));
        push(&mut f, "images", names_of(containers, "image"));
        if !init.is_empty() {
            push(&mut f, "initContainers", names_of(init, "name"));
        }
        if let Some(r) = ctx.doc.pointer("/spec/replicas").and_then(render_scalar) {
            push(&mut f, "replicas", r);
        }
        if let Some(sa) = spec.get("serviceAccountName").and_then(|v| v.as_str()) {
            push(&mut f, "serviceAccount", sa);
        }
        push(&mut f, "node", ctx.node);
        if !ctx.owners.is_empty() {
            let kinds: Vec<&str> = ctx.owners.iter().map(|o| o.kind_or_unknown()).collect();
            push(&mut f, "ownerKinds", kinds.join(","));
        }
        if let Some(phase) = ctx.phase {
            push(&mut f, "phase", phase);
        }
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

/// Secret type and key names. Values are never read.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretHandler;

impl KindHandler for SecretHandler {
    fn name(&self) -> &'static str { "secret" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let mut keys: Vec<&str> = ["data", "stringData"]
            .iter()
            .filter_map(|k| ctx.doc.get(*k).and_then(|v| v.as_object()))
            .flat_map(|m| m.keys().map(|k| k.as_str()))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        let mut f = Fields::new();
        push(&mut f, "type", project::str_at(ctx.doc, "type").unwrap_or("Opaque"));
        push(&mut f, "keys", keys.join(","));
        push(&mut f, "count", keys.len().to_string());
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceHandler;

impl KindHandler for ServiceHandler {
    fn name(&self) -> &'static str { "service" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let ports = array_at(ctx.doc, "/spec/ports", "spec.ports")?.map(|v| v.as_slice()).unwrap_or(&[]);
        let ports: Vec<String> = ports
            .iter()
            .filter_map(|p| {
                let port = p.get("port").and_then(render_scalar)?;
                let proto = p.get("protocol").and_then(|v| v.as_str()).unwrap_or("TCP");
                Some(match p.get("targetPort").and_then(render_scalar) {
                    Some(t) => format!("{}/{}->{}", port, proto, t),
                    None => format!("{}/{}", port, proto),
                })
            })
            .collect();
        let mut selector: Vec<String> = ctx
            .doc
            .pointer("/spec/selector")
            .and_then(|v| v.as_object())
            .map(|m| m.iter().filter_map(|(k, v)| render_scalar(v).map(|v| format!("{}={}", k, v))).collect())
            .unwrap_or_default();
        selector.sort();

        let mut f = Fields::new();
        push(&mut f, "type", project::str_at(ctx.doc, "spec.type").unwrap_or("ClusterIP"));
        if let Some(ip) = project::str_at(ctx.doc, "spec.clusterIP") {
            push(&mut f, "clusterIP", ip);
        }
        push(&mut f, "ports", ports.join(","));
        push(&mut f, "selector", selector.join(","));
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

/// Role and ClusterRole rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleHandler;

impl KindHandler for RoleHandler {
    fn name(&self) -> &'static str { "role" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let rules = array_at(ctx.doc, "/rules", "rules")?.map(|v| v.as_slice()).unwrap_or(&[]);
        let mut resources: Vec<&str> = Vec::new();
        let mut verbs: Vec<&str> = Vec::new();
        for rule in rules {
            resources.extend(str_list(rule, "resources"));
            verbs.extend(str_list(rule, "verbs"));
        }
        resources.sort_unstable();
        resources.dedup();
        verbs.sort_unstable();
        verbs.dedup();
        let mut f = Fields::new();
        push(&mut f, "rules", rules.len().to_string());
        push(&mut f, "resources", resources.join(","));
        push(&mut f, "verbs", verbs.join(","));
        if ctx.doc.get("aggregationRule").is_some() {
            push(&mut f, "aggregated", "true");
        }
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

/// RoleBinding and ClusterRoleBinding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingHandler;

impl KindHandler for BindingHandler {
    fn name(&self) -> &'static str { "binding" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let role_ref = ctx.doc.get("roleRef").filter(|v| v.is_object()).ok_or(HandlerError::MissingField("roleRef"))?;
        let subjects = array_at(ctx.doc, "/subjects", "subjects")?.map(|v| v.as_slice()).unwrap_or(&[]);
        let subjects: Vec<String> = subjects
            .iter()
            .map(|s| {
                let kind = s.get("kind").and_then(|v| v.as_str()).unwrap_or(kmap_core::UNKNOWN);
                let name = s.get("name").and_then(|v| v.as_str()).unwrap_or(kmap_core::UNKNOWN);
                match s.get("namespace").and_then(|v| v.as_str()) {
                    Some(ns) => format!("{}:{}/{}", kind, ns, name),
                    None => format!("{}:{}", kind, name),
                }
            })
            .collect();
        let mut f = Fields::new();
        push(&mut f, "roleKind", role_ref.get("kind").and_then(|v| v.as_str()).unwrap_or(kmap_core::UNKNOWN));
        push(&mut f, "roleName", role_ref.get("name").and_then(|v| v.as_str()).unwrap_or(kmap_core::UNKNOWN));
        push(&mut f, "subjects", subjects.join(","));
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceAccountHandler;

impl KindHandler for ServiceAccountHandler {
    fn name(&self) -> &'static str { "serviceaccount" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let secrets = array_at(ctx.doc, "/secrets", "secrets")?.map(|v| v.as_slice()).unwrap_or(&[]);
        let pulls = array_at(ctx.doc, "/imagePullSecrets", "imagePullSecrets")?.map(|v| v.as_slice()).unwrap_or(&[]);
        let mut f = Fields::new();
        push(&mut f, "secrets", names_of(secrets, "name"));
        push(&mut f, "imagePullSecrets", names_of(pulls, "name"));
        if let Some(b) = ctx.doc.get("automountServiceAccountToken").and_then(|v| v.as_bool()) {
            push(&mut f, "automount", b.to_string());
        }
        emit(out, ctx, self.name(), f);
        Ok(())
    }
}

/// Scalar projection over well-known paths for kinds that need no logic of
/// their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionHandler;

impl ProjectionHandler {
    pub fn paths(kind: &str) -> &'static [PathSpec] {
        match kind {
            "ControllerRevision" => &[("revision", "revision")],
            "CSIDriver" => &[("attachRequired", "spec.attachRequired"), ("podInfoOnMount", "spec.podInfoOnMount")],
            "CSINode" => &[("driver", "spec.drivers[0].name"), ("nodeID", "spec.drivers[0].nodeID")],
            "CustomResourceDefinition" => &[
                ("group", "spec.group"),
                ("plural", "spec.names.plural"),
                ("kind", "spec.names.kind"),
                ("scope", "spec.scope"),
                ("version", "spec.versions[0].name"),
            ],
            "Endpoints" => &[("address", "subsets[0].addresses[0].ip"), ("port", "subsets[0].ports[0].port")],
            "EndpointSlice" => &[("addressType", "addressType"), ("address", "endpoints[0].addresses[0]")],
            "Event" => &[
                ("type", "type"),
                ("reason", "reason"),
                ("message", "message"),
                ("involvedKind", "involvedObject.kind"),
                ("involvedName", "involvedObject.name"),
                ("count", "count"),
            ],
            "HorizontalPodAutoscaler" => &[
                ("targetKind", "spec.scaleTargetRef.kind"),
                ("targetName", "spec.scaleTargetRef.name"),
                ("minReplicas", "spec.minReplicas"),
                ("maxReplicas", "spec.maxReplicas"),
            ],
            "Node" => &[
                ("podCIDR", "spec.podCIDR"),
                ("kubelet", "status.nodeInfo.kubeletVersion"),
                ("os", "status.nodeInfo.osImage"),
                ("arch", "status.nodeInfo.architecture"),
            ],
            "PersistentVolume" => &[
                ("capacity", "spec.capacity.storage"),
                ("storageClassName", "spec.storageClassName"),
                ("reclaimPolicy", "spec.persistentVolumeReclaimPolicy"),
                ("phase", "status.phase"),
            ],
            "PersistentVolumeClaim" => &[
                ("request", "spec.resources.requests.storage"),
                ("storageClassName", "spec.storageClassName"),
                ("volumeName", "spec.volumeName"),
                ("phase", "status.phase"),
            ],
            "StorageClass" => &[("provisioner", "provisioner"), ("reclaimPolicy", "reclaimPolicy")],
            "VolumeAttachment" => &[
                ("attacher", "spec.attacher"),
                ("node", "spec.nodeName"),
                ("volume", "spec.source.persistentVolumeName"),
                ("attached", "status.attached"),
            ],
            _ => &[],
        }
    }
}

impl KindHandler for ProjectionHandler {
    fn name(&self) -> &'static str { "projection" }

    fn handle(&self, ctx: &HandlerCtx<'_>, out: &mut DetailTable) -> Result<(), HandlerError> {
        let fields = project::project(ctx.doc, Self::paths(&ctx.record.kind));
        emit(out, ctx, self.name(), fields);
        Ok(())
    }
}
