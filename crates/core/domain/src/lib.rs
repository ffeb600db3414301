//! # 核心领域模型
//!
//! 定义 PDU 桥接器各模块共享的领域类型：
//! - [`model`]：单次轮询的解码快照（Snapshot）及其子结构
//! - [`oids`]：CyberPower ePDU MIB 的 OID 常量与构造函数
//! - [`decode`]：原始 OID 值表到快照的纯解码函数（缩放与计量下限）
//! - [`outlet_spec`]：插座表达式文法（`3`、`1,3,5`、`2-6`）
//!
//! 本 crate 不做任何 I/O，所有函数均为纯函数，便于各实现层复用与测试。

pub mod decode;
pub mod model;
pub mod oids;
pub mod outlet_spec;

pub use decode::{decode_snapshot, RawValue, SnapshotLayout};
pub use model::{
    AtsSource, BankData, BankLoadState, ColdstartState, DeviceIdentity, EnvironmentData,
    OutletAction, OutletData, OutletState, Snapshot, SourceData, SourceVoltageStatus,
};
pub use outlet_spec::{parse_outlet_spec, OutletSpecError};
