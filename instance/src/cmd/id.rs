use anyhow::Context;

use instance::lock::InstanceLock;
use instance::SingleInstance;

pub(crate) fn print_id(ctx: &crate::Ctx) -> anyhow::Result<()> {
    let instance = SingleInstance::new(ctx.config.clone());
    let paths = instance.paths();

    let running = InstanceLock::new(paths.lock.clone())
        .has_live_holder()
        .context("inspect lock")?;

    println!("id:      {}", instance.instance_id());
    println!("scope:   {}", if instance.is_global() { "global" } else { "local" });
    println!("lock:    {}", paths.lock.display());
    println!("socket:  {}", paths.socket.display());
    println!("running: {}", if running { "yes" } else { "no" });
    Ok(())
}
