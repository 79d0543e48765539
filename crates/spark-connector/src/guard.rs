use std::{
    fmt,
    ops::{Deref, DerefMut},
};

/// 持有一项已获取资源及其释放义务的作用域守卫。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 分层打开（传输连接 → 输出流 → 输入流 → 安全会话）任何一步失败时，
///   已获取的资源必须按获取的逆序释放；把“释放义务”在获取后立即登记到守卫里，
///   Rust 的作用域析构顺序天然给出逆序展开，无需手写标志位。
///
/// ## 契约（What）
/// - `new(value, release)`：登记资源与释放闭包；
/// - 守卫被丢弃且未 `disarm` 时，调用 `release(value)`；
/// - `disarm()`：成功路径上取回资源，释放义务随之撤销。
///
/// ## 风险提示（Trade-offs）
/// - 释放闭包在 `Drop` 中执行，不能向调用方返回错误；需要上报的清理失败应在闭包内记录日志，
///   让原始触发错误继续向上传播。
pub struct ReleaseGuard<T, F>
where
    F: FnOnce(T),
{
    slot: Option<(T, F)>,
}

impl<T, F> ReleaseGuard<T, F>
where
    F: FnOnce(T),
{
    pub fn new(value: T, release: F) -> Self {
        Self {
            slot: Some((value, release)),
        }
    }

    /// 撤销释放义务并取回资源。
    pub fn disarm(mut self) -> T {
        match self.slot.take() {
            Some((value, _release)) => value,
            None => unreachable!("release guard is only emptied by disarm or drop"),
        }
    }
}

impl<T, F> Deref for ReleaseGuard<T, F>
where
    F: FnOnce(T),
{
    type Target = T;

    fn deref(&self) -> &T {
        match &self.slot {
            Some((value, _)) => value,
            None => unreachable!("release guard is only emptied by disarm or drop"),
        }
    }
}

impl<T, F> DerefMut for ReleaseGuard<T, F>
where
    F: FnOnce(T),
{
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.slot {
            Some((value, _)) => value,
            None => unreachable!("release guard is only emptied by disarm or drop"),
        }
    }
}

impl<T, F> Drop for ReleaseGuard<T, F>
where
    F: FnOnce(T),
{
    fn drop(&mut self) {
        if let Some((value, release)) = self.slot.take() {
            release(value);
        }
    }
}

impl<T: fmt::Debug, F> fmt::Debug for ReleaseGuard<T, F>
where
    F: FnOnce(T),
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("value", &self.slot.as_ref().map(|(value, _)| value))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn nested_guards_release_in_reverse_order() {
        let log = RefCell::new(Vec::new());
        {
            let _outer = ReleaseGuard::new("transport", |name| log.borrow_mut().push(name));
            let _middle = ReleaseGuard::new("output", |name| log.borrow_mut().push(name));
            let _inner = ReleaseGuard::new("input", |name| log.borrow_mut().push(name));
        }
        assert_eq!(*log.borrow(), vec!["input", "output", "transport"]);
    }

    #[test]
    fn disarm_cancels_release() {
        let released = RefCell::new(false);
        let guard = ReleaseGuard::new(7_u32, |_| *released.borrow_mut() = true);
        assert_eq!(*guard, 7);
        assert_eq!(guard.disarm(), 7);
        assert!(!*released.borrow());
    }
}
