// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The wire surface this client depends on: method paths, message types and
//! typed wrappers over the intercepted call path.
//!
//! Three services are used directly: the machine service (resource inventory
//! and machine-wide operations), the session service, and the reflection
//! service (service descriptors for foreign APIs). The signalling and auth
//! services are dialled by transports, not called here, but their method
//! paths participate in the session exemption rules.

use crate::{
    context::CallContext,
    error::Error,
    interceptor::CallHandle,
    resource::{Api, ResourceName, ServiceDescriptor},
};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// The machine service.
pub const MACHINE_SERVICE: &str = "machina.v1.MachineService";
/// The session service.
pub const SESSION_SERVICE: &str = "machina.v1.SessionService";
/// The reflection service.
pub const REFLECTION_SERVICE: &str = "machina.reflection.v1.ReflectionService";
/// The WebRTC signalling service (used during dialing, never called here).
pub const SIGNALLING_SERVICE: &str = "machina.webrtc.v1.SignallingService";
/// The authentication service.
pub const AUTH_SERVICE: &str = "machina.auth.v1.AuthService";
/// The external (delegated) authentication service.
pub const EXTERNAL_AUTH_SERVICE: &str = "machina.auth.v1.ExternalAuthService";

/// Machine service method paths.
pub mod machine {
    /// `ResourceNames` lists the machine's current resource inventory.
    pub const RESOURCE_NAMES: &str = "/machina.v1.MachineService/ResourceNames";
    /// `ResourceRPCSubtypes` lists the proto service behind each API.
    pub const RESOURCE_RPC_SUBTYPES: &str = "/machina.v1.MachineService/ResourceRPCSubtypes";
    /// `DiscoverComponents` probes for configurable components.
    pub const DISCOVER_COMPONENTS: &str = "/machina.v1.MachineService/DiscoverComponents";
    /// `FrameSystemConfig` fetches the machine's frame system.
    pub const FRAME_SYSTEM_CONFIG: &str = "/machina.v1.MachineService/FrameSystemConfig";
    /// `TransformPose` re-expresses a pose in another frame.
    pub const TRANSFORM_POSE: &str = "/machina.v1.MachineService/TransformPose";
    /// `TransformPointCloud` re-expresses a point cloud in another frame.
    pub const TRANSFORM_POINT_CLOUD: &str = "/machina.v1.MachineService/TransformPointCloud";
    /// `StopAll` stops every resource that can move.
    pub const STOP_ALL: &str = "/machina.v1.MachineService/StopAll";
    /// `GetMachineStatus` reports the machine's overall state.
    pub const GET_MACHINE_STATUS: &str = "/machina.v1.MachineService/GetMachineStatus";
    /// `GetVersion` reports the server's version information.
    pub const GET_VERSION: &str = "/machina.v1.MachineService/GetVersion";
    /// `GetCloudMetadata` reports the machine's cloud identity.
    pub const GET_CLOUD_METADATA: &str = "/machina.v1.MachineService/GetCloudMetadata";
    /// `RestartModule` restarts one module on the machine.
    pub const RESTART_MODULE: &str = "/machina.v1.MachineService/RestartModule";
    /// `Shutdown` shuts the machine down.
    pub const SHUTDOWN: &str = "/machina.v1.MachineService/Shutdown";
    /// `Log` forwards client log entries to the machine's logger.
    pub const LOG: &str = "/machina.v1.MachineService/Log";
}

/// Session service method paths.
pub mod session {
    /// `StartSession` starts (or resumes) a session.
    pub const START_SESSION: &str = "/machina.v1.SessionService/StartSession";
    /// `SendSessionHeartbeat` keeps a session alive.
    pub const SEND_SESSION_HEARTBEAT: &str = "/machina.v1.SessionService/SendSessionHeartbeat";
}

/// Reflection service method paths.
pub mod reflection {
    /// `ResolveService` fetches a service descriptor by proto symbol name.
    pub const RESOLVE_SERVICE: &str = "/machina.reflection.v1.ReflectionService/ResolveService";
}

// Whole services whose methods never carry a session.
const SESSION_EXEMPT_SERVICES: &[&str] = &[
    REFLECTION_SERVICE,
    SIGNALLING_SERVICE,
    AUTH_SERVICE,
    EXTERNAL_AUTH_SERVICE,
    SESSION_SERVICE,
];

// Individual exempt methods: the resource listing calls double as the
// connection health probe and must work before any session exists.
const SESSION_EXEMPT_METHODS: &[&str] =
    &[machine::RESOURCE_NAMES, machine::RESOURCE_RPC_SUBTYPES];

/// Whether `method` must not carry a session id and must not trigger a
/// session start. Consulted before any session work is done for a call.
pub fn is_session_exempt(method: &str) -> bool {
    SESSION_EXEMPT_SERVICES.contains(&service_of(method))
        || SESSION_EXEMPT_METHODS.contains(&method)
}

fn service_of(method: &str) -> &str {
    let method = method.strip_prefix('/').unwrap_or(method);
    method.split('/').next().unwrap_or(method)
}

/// An empty request or response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ResourceNamesResponse {
    pub resources: Vec<ResourceName>,
}

/// One entry of the `ResourceRPCSubtypes` response: an API identity and the
/// proto service implementing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSubtype {
    /// The API identity.
    pub api: Api,
    /// The fully qualified proto service name behind it.
    pub proto_service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ResourceRpcSubtypesResponse {
    pub subtypes: Vec<RpcSubtype>,
}

/// A query for `DiscoverComponents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// The API to discover instances of.
    pub api: Api,
    /// The model to discover instances of.
    pub model: String,
}

/// One discovery result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    /// The query this result answers.
    pub query: DiscoveryQuery,
    /// Model-specific discovery results.
    pub results: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DiscoverComponentsRequest {
    pub queries: Vec<DiscoveryQuery>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DiscoverComponentsResponse {
    pub discoveries: Vec<Discovery>,
}

/// A position and orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// X translation, millimetres.
    pub x: f64,
    /// Y translation, millimetres.
    pub y: f64,
    /// Z translation, millimetres.
    pub z: f64,
    /// Orientation vector X component.
    pub o_x: f64,
    /// Orientation vector Y component.
    pub o_y: f64,
    /// Orientation vector Z component.
    pub o_z: f64,
    /// Rotation about the orientation vector, degrees.
    pub theta: f64,
}

/// A [`Pose`] expressed relative to a named reference frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseInFrame {
    /// The frame the pose is expressed in.
    pub reference_frame: String,
    /// The pose itself.
    pub pose: Pose,
}

/// One frame of the machine's frame system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSystemConfig {
    /// The frame's name.
    pub name: String,
    /// Where the frame sits relative to its parent.
    pub pose_in_parent: PoseInFrame,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FrameSystemConfigRequest {
    pub additional_transforms: Vec<Transform>,
}

/// A caller-supplied transform to consider alongside the machine's own frame
/// system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transform {
    /// The name of the frame the transform introduces.
    pub reference_frame: String,
    /// Where the introduced frame sits.
    pub pose_in_observer_frame: PoseInFrame,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FrameSystemConfigResponse {
    pub frame_system_configs: Vec<FrameSystemConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TransformPoseRequest {
    pub source: PoseInFrame,
    pub destination: String,
    pub supplemental_transforms: Vec<Transform>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TransformPoseResponse {
    pub pose: PoseInFrame,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TransformPointCloudRequest {
    /// PCD bytes, base64.
    pub point_cloud_pcd: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TransformPointCloudResponse {
    pub point_cloud_pcd: String,
}

/// Per-resource extra parameters for `StopAll`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopExtra {
    /// The resource the parameters apply to.
    pub name: ResourceName,
    /// Resource-specific stop parameters.
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StopAllRequest {
    pub extra: Vec<StopExtra>,
}

/// The machine's overall state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// The machine is still wiring resources up.
    Initializing,
    /// The machine is serving.
    Running,
}

/// The response of `GetMachineStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineStatus {
    /// The machine's overall state.
    pub state: MachineState,
}

/// The response of `GetVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The server platform, e.g. `machina-server`.
    pub platform: String,
    /// The server's own version.
    pub version: String,
    /// The API version the server speaks.
    pub api_version: String,
}

/// The response of `GetCloudMetadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudMetadata {
    /// The organization owning the machine.
    pub primary_org_id: String,
    /// The location the machine belongs to.
    pub location_id: String,
    /// The machine's cloud id.
    pub machine_id: String,
    /// The machine part this server is.
    pub machine_part_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RestartModuleRequest {
    pub module_name: String,
}

/// One log entry forwarded to the machine's logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// The severity, e.g. `info`.
    pub level: String,
    /// The logger the entry came from.
    pub logger_name: String,
    /// The message itself.
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LogRequest {
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StartSessionRequest {
    /// The previous session id to resume, or empty to start fresh.
    pub resume: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StartSessionResponse {
    pub id: String,
    pub heartbeat_window_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SendSessionHeartbeatRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ResolveServiceRequest {
    pub symbol: String,
}

/// An interface to call the machine service methods.
#[derive(Debug, Clone)]
pub struct MachineMethods {
    handle: CallHandle,
}

impl MachineMethods {
    /// Instantiate the machine service method interface.
    pub fn new(handle: CallHandle) -> Self {
        MachineMethods { handle }
    }

    /// List the machine's current resource inventory.
    pub async fn resource_names(&self, ctx: &CallContext) -> Result<Vec<ResourceName>, Error> {
        let response: ResourceNamesResponse = self
            .handle
            .unary(ctx, machine::RESOURCE_NAMES, &Empty {})
            .await?;
        Ok(response.resources)
    }

    /// List the proto service behind each of the machine's APIs.
    pub async fn resource_rpc_subtypes(&self, ctx: &CallContext) -> Result<Vec<RpcSubtype>, Error> {
        let response: ResourceRpcSubtypesResponse = self
            .handle
            .unary(ctx, machine::RESOURCE_RPC_SUBTYPES, &Empty {})
            .await?;
        Ok(response.subtypes)
    }

    /// Probe for configurable components.
    pub async fn discover_components(
        &self,
        ctx: &CallContext,
        queries: Vec<DiscoveryQuery>,
    ) -> Result<Vec<Discovery>, Error> {
        let response: DiscoverComponentsResponse = self
            .handle
            .unary(
                ctx,
                machine::DISCOVER_COMPONENTS,
                &DiscoverComponentsRequest { queries },
            )
            .await?;
        Ok(response.discoveries)
    }

    /// Fetch the machine's frame system configuration.
    pub async fn frame_system_config(
        &self,
        ctx: &CallContext,
        additional_transforms: Vec<Transform>,
    ) -> Result<Vec<FrameSystemConfig>, Error> {
        let response: FrameSystemConfigResponse = self
            .handle
            .unary(
                ctx,
                machine::FRAME_SYSTEM_CONFIG,
                &FrameSystemConfigRequest {
                    additional_transforms,
                },
            )
            .await?;
        Ok(response.frame_system_configs)
    }

    /// Re-express `source` in the `destination` frame.
    pub async fn transform_pose(
        &self,
        ctx: &CallContext,
        source: PoseInFrame,
        destination: impl Into<String>,
        supplemental_transforms: Vec<Transform>,
    ) -> Result<PoseInFrame, Error> {
        let response: TransformPoseResponse = self
            .handle
            .unary(
                ctx,
                machine::TRANSFORM_POSE,
                &TransformPoseRequest {
                    source,
                    destination: destination.into(),
                    supplemental_transforms,
                },
            )
            .await?;
        Ok(response.pose)
    }

    /// Re-express a PCD-encoded point cloud in the `destination` frame.
    pub async fn transform_point_cloud(
        &self,
        ctx: &CallContext,
        point_cloud_pcd: &[u8],
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Vec<u8>, Error> {
        let engine = base64::engine::general_purpose::STANDARD;
        let response: TransformPointCloudResponse = self
            .handle
            .unary(
                ctx,
                machine::TRANSFORM_POINT_CLOUD,
                &TransformPointCloudRequest {
                    point_cloud_pcd: engine.encode(point_cloud_pcd),
                    source: source.into(),
                    destination: destination.into(),
                },
            )
            .await?;
        engine
            .decode(response.point_cloud_pcd)
            .map_err(|e| Error::Status(machina_rpcs::Status::internal(format!(
                "undecodable point cloud in response: {e}"
            ))))
    }

    /// Stop every resource that can move.
    pub async fn stop_all(&self, ctx: &CallContext, extra: Vec<StopExtra>) -> Result<(), Error> {
        let _: Empty = self
            .handle
            .unary(ctx, machine::STOP_ALL, &StopAllRequest { extra })
            .await?;
        Ok(())
    }

    /// Report the machine's overall state.
    pub async fn get_machine_status(&self, ctx: &CallContext) -> Result<MachineStatus, Error> {
        self.handle
            .unary(ctx, machine::GET_MACHINE_STATUS, &Empty {})
            .await
    }

    /// Report the server's version information.
    pub async fn get_version(&self, ctx: &CallContext) -> Result<VersionInfo, Error> {
        self.handle.unary(ctx, machine::GET_VERSION, &Empty {}).await
    }

    /// Report the machine's cloud identity.
    pub async fn get_cloud_metadata(&self, ctx: &CallContext) -> Result<CloudMetadata, Error> {
        self.handle
            .unary(ctx, machine::GET_CLOUD_METADATA, &Empty {})
            .await
    }

    /// Restart one module on the machine.
    pub async fn restart_module(
        &self,
        ctx: &CallContext,
        module_name: impl Into<String>,
    ) -> Result<(), Error> {
        let _: Empty = self
            .handle
            .unary(
                ctx,
                machine::RESTART_MODULE,
                &RestartModuleRequest {
                    module_name: module_name.into(),
                },
            )
            .await?;
        Ok(())
    }

    /// Shut the machine down.
    pub async fn shutdown(&self, ctx: &CallContext) -> Result<(), Error> {
        let _: Empty = self.handle.unary(ctx, machine::SHUTDOWN, &Empty {}).await?;
        Ok(())
    }

    /// Forward log entries to the machine's logger.
    pub async fn log(&self, ctx: &CallContext, logs: Vec<LogEntry>) -> Result<(), Error> {
        let _: Empty = self
            .handle
            .unary(ctx, machine::LOG, &LogRequest { logs })
            .await?;
        Ok(())
    }
}

/// An interface to call the session service methods.
#[derive(Debug, Clone)]
pub(crate) struct SessionMethods {
    handle: CallHandle,
}

impl SessionMethods {
    pub(crate) fn new(handle: CallHandle) -> Self {
        SessionMethods { handle }
    }

    pub(crate) async fn start_session(
        &self,
        ctx: &CallContext,
        resume: String,
    ) -> Result<StartSessionResponse, Error> {
        self.handle
            .unary(ctx, session::START_SESSION, &StartSessionRequest { resume })
            .await
    }

    pub(crate) async fn send_session_heartbeat(
        &self,
        ctx: &CallContext,
        id: String,
    ) -> Result<(), Error> {
        let _: Empty = self
            .handle
            .unary(
                ctx,
                session::SEND_SESSION_HEARTBEAT,
                &SendSessionHeartbeatRequest { id },
            )
            .await?;
        Ok(())
    }
}

/// An interface to call the reflection service methods.
#[derive(Debug, Clone)]
pub(crate) struct ReflectionMethods {
    handle: CallHandle,
}

impl ReflectionMethods {
    pub(crate) fn new(handle: CallHandle) -> Self {
        ReflectionMethods { handle }
    }

    pub(crate) async fn resolve_service(
        &self,
        ctx: &CallContext,
        symbol: impl Into<String>,
    ) -> Result<ServiceDescriptor, Error> {
        self.handle
            .unary(
                ctx,
                reflection::RESOLVE_SERVICE,
                &ResolveServiceRequest {
                    symbol: symbol.into(),
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_exemptions() {
        assert!(is_session_exempt(session::START_SESSION));
        assert!(is_session_exempt(session::SEND_SESSION_HEARTBEAT));
        assert!(is_session_exempt(reflection::RESOLVE_SERVICE));
        assert!(is_session_exempt(machine::RESOURCE_NAMES));
        assert!(is_session_exempt(machine::RESOURCE_RPC_SUBTYPES));
        assert!(is_session_exempt(
            "/machina.webrtc.v1.SignallingService/Call"
        ));
        assert!(is_session_exempt("/machina.auth.v1.AuthService/Authenticate"));

        assert!(!is_session_exempt(machine::GET_MACHINE_STATUS));
        assert!(!is_session_exempt(machine::STOP_ALL));
        assert!(!is_session_exempt("/acme.gizmo.v1.GizmoService/Poke"));
    }

    #[test]
    fn machine_state_wire_form() {
        assert_eq!(
            serde_json::to_string(&MachineState::Initializing).unwrap(),
            r#""initializing""#
        );
        assert_eq!(
            serde_json::from_str::<MachineState>(r#""running""#).unwrap(),
            MachineState::Running
        );
    }
}
