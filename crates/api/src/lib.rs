//! # TaskQueue API
//!
//! 分层任务队列的REST接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 任务
//! - `POST /api/tasks` - 提交任务（`task_type`、`payload`、`priority`、可选 `deadline`）
//! - `GET /api/tasks/{id}` - 任务当前状态与转换历史
//! - `POST /api/tasks/{id}/cancel` - 取消任务
//!
//! ### 账本与监控
//! - `GET /api/ledger` - 按任务、目标状态、时间范围查询转换记录
//! - `GET /api/monitoring` - 每个层级的积压、最老任务年龄、worker数量
//! - `GET /api/workers` - worker健康记录
//!
//! ### 死信
//! - `GET /api/dead-letters` - 死信列表
//! - `GET /api/dead-letters/{id}` - 死信详情
//! - `POST /api/dead-letters/{id}/replay` - 以新任务重放
//! - `DELETE /api/dead-letters/{id}` - 丢弃，账本历史保留
//!
//! ### 系统
//! - `GET /health` - 健康检查
//! - `GET /metrics` - Prometheus指标
//!
//! ## 响应格式
//!
//! ```json
//! { "success": true, "data": { "task_id": "..." }, "timestamp": "2024-01-01T00:00:00Z" }
//! ```
//!
//! 错误响应：
//!
//! ```json
//! {
//!   "success": false,
//!   "error": { "message": "任务类型不能为空", "type": "VALIDATION_ERROR", "code": 400 },
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::create_routes;

pub use error::{ApiError, ApiResult};
pub use routes::AppState;

/// 创建完整的API应用
pub fn create_app(state: AppState, cors_enabled: bool) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
